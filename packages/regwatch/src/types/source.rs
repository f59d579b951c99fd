//! Monitored sources and the jurisdictions that own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::schema::ExtractionSchema;

/// How a source is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTML page
    Web,
    /// JSON endpoint
    Api,
    /// Document feed (PDF, plain text)
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Api => "api",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "api" => Ok(Self::Api),
            "document" | "pdf" => Ok(Self::Document),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// A monitored endpoint.
///
/// Sources are soft-deleted only; revisions keep referencing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub project_id: Uuid,
    pub jurisdiction_id: Uuid,
    pub name: String,
    pub url: String,
    pub kind: SourceKind,

    /// Polling cadence label consumed by the external scheduler (e.g. "DAILY")
    pub scrape_frequency: String,

    /// Content type to assume when the response does not declare one
    pub expected_content_type: Option<String>,

    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Create an active web source.
    pub fn new(
        project_id: Uuid,
        jurisdiction_id: Uuid,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            jurisdiction_id,
            name: name.into(),
            url: url.into(),
            kind: SourceKind::Web,
            scrape_frequency: "DAILY".to_string(),
            expected_content_type: None,
            is_active: true,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_expected_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.expected_content_type = Some(content_type.into());
        self
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.scrape_frequency = frequency.into();
        self
    }

    /// Whether the pipeline may run for this source.
    pub fn is_runnable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// A jurisdiction groups sources and fixes their extraction schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,

    /// Extra instructions appended to the schema's own instructions
    pub instructions: String,

    pub schema: ExtractionSchema,
}

impl Jurisdiction {
    pub fn new(project_id: Uuid, name: impl Into<String>, schema: ExtractionSchema) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            instructions: String::new(),
            schema,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_round_trip_names() {
        assert_eq!("web".parse::<SourceKind>().unwrap(), SourceKind::Web);
        assert_eq!("PDF".parse::<SourceKind>().unwrap(), SourceKind::Document);
        assert!("ftp".parse::<SourceKind>().is_err());
        assert_eq!(SourceKind::Api.to_string(), "api");
    }

    #[test]
    fn test_runnable() {
        let mut source = Source::new(Uuid::new_v4(), Uuid::new_v4(), "Rates", "https://example.gov");
        assert!(source.is_runnable());
        source.is_deleted = true;
        assert!(!source.is_runnable());
    }
}
