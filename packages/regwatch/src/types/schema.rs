//! Extraction schemas and output conformance.
//!
//! A schema is the fixed set of fields the extraction backend may populate.
//! Conforming a raw payload always yields a mapping with exactly the schema's
//! key set (absent optional fields become `null`), so two deterministic
//! extractions of the same text compare equal key-for-key.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Extracted field mapping. Ordered so iteration never depends on hashing.
pub type FieldMap = BTreeMap<String, Value>;

/// Value type a schema field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    /// ISO date (`YYYY-MM-DD`) or RFC 3339 timestamp, kept as a string
    Date,
    List,
    Object,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::List => "list",
            Self::Object => "object",
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            Self::String | Self::Date => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "array",
            Self::Object => "object",
        }
    }

    /// Coerce a non-null value into this kind, or `None` on type mismatch.
    ///
    /// Numeric and boolean strings are accepted because model backends often
    /// quote scalars; the coerced value is what gets stored and compared.
    fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(s)) => Some(Value::String(s)),
            (Self::Number, Value::Number(n)) => Some(Value::Number(n)),
            (Self::Number, Value::String(s)) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (Self::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Date, Value::String(s)) => {
                let valid = NaiveDate::parse_from_str(&s, "%Y-%m-%d").is_ok()
                    || DateTime::parse_from_rfc3339(&s).is_ok();
                valid.then_some(Value::String(s))
            }
            (Self::List, Value::Array(items)) => Some(Value::Array(items)),
            (Self::Object, Value::Object(map)) => Some(Value::Object(map)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field the extraction backend is allowed to populate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// The fixed set of fields extracted for a jurisdiction class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub name: String,

    /// Monitoring goal given to the extraction backend
    #[serde(default)]
    pub instructions: String,

    pub fields: Vec<FieldSpec>,
}

impl ExtractionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// SHA-256 over the schema's canonical JSON.
    ///
    /// Recorded on every revision so a schema change is never mistaken for
    /// unchanged content.
    pub fn fingerprint(&self) -> String {
        // Struct serialization has a fixed field order, and `fields` is a Vec.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// JSON schema for a structured-output response
    /// (`{ fields: {...}, summary, confidence }`).
    pub fn response_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.fields {
            let mut description = spec.description.clone();
            if spec.kind == FieldKind::Date {
                description.push_str(" (YYYY-MM-DD)");
            }
            properties.insert(
                spec.name.clone(),
                json!({
                    "type": [spec.kind.json_type(), "null"],
                    "description": description.trim(),
                }),
            );
        }
        let field_names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        json!({
            "type": "object",
            "properties": {
                "fields": {
                    "type": "object",
                    "properties": properties,
                    "required": field_names,
                    "additionalProperties": false,
                },
                "summary": { "type": "string" },
                "confidence": { "type": "number" },
            },
            "required": ["fields", "summary", "confidence"],
            "additionalProperties": false,
        })
    }

    /// Validate and normalize a raw field payload against this schema.
    ///
    /// The result contains every schema field and nothing else. Strings are
    /// trimmed recursively and empty strings count as absent.
    pub fn conform(&self, raw: &Map<String, Value>) -> Result<FieldMap, SchemaIssues> {
        let mut issues = Vec::new();

        for key in raw.keys() {
            if self.field(key).is_none() {
                issues.push(SchemaIssue::Extraneous { field: key.clone() });
            }
        }

        let mut fields = FieldMap::new();
        for spec in &self.fields {
            let value = raw
                .get(&spec.name)
                .cloned()
                .map(canonicalize)
                .unwrap_or(Value::Null);

            if value.is_null() {
                if spec.required {
                    issues.push(SchemaIssue::MissingRequired {
                        field: spec.name.clone(),
                    });
                }
                fields.insert(spec.name.clone(), Value::Null);
                continue;
            }

            let found = json_type_name(&value);
            match spec.kind.coerce(value) {
                Some(coerced) => {
                    fields.insert(spec.name.clone(), coerced);
                }
                None => issues.push(SchemaIssue::WrongType {
                    field: spec.name.clone(),
                    expected: spec.kind,
                    found,
                }),
            }
        }

        if issues.is_empty() {
            Ok(fields)
        } else {
            Err(SchemaIssues(issues))
        }
    }
}

/// Trim strings recursively; empty strings become `null`.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::String(trimmed.to_string())
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.trim().to_string(), canonicalize(v)))
                .collect(),
        ),
        other => other,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single way an extraction payload departs from its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    /// Key not declared in the schema
    Extraneous { field: String },
    /// Required field absent or empty
    MissingRequired { field: String },
    /// Value cannot be read as the declared kind
    WrongType {
        field: String,
        expected: FieldKind,
        found: &'static str,
    },
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraneous { field } => write!(f, "undeclared field `{field}`"),
            Self::MissingRequired { field } => write!(f, "missing required field `{field}`"),
            Self::WrongType {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expected {expected}, found {found}"),
        }
    }
}

/// All issues found while conforming one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssues(pub Vec<SchemaIssue>);

impl SchemaIssues {
    pub fn iter(&self) -> impl Iterator<Item = &SchemaIssue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SchemaIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates_schema() -> ExtractionSchema {
        ExtractionSchema::new("rates")
            .with_field(FieldSpec::new("rate", FieldKind::Number).required())
            .with_field(FieldSpec::new("effective_date", FieldKind::Date))
            .with_field(FieldSpec::new("authority", FieldKind::String))
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_conform_fills_missing_optional_with_null() {
        let fields = rates_schema()
            .conform(&payload(json!({ "rate": 10.0 })))
            .unwrap();

        assert_eq!(fields.len(), 3);
        assert_eq!(fields["rate"], json!(10.0));
        assert_eq!(fields["effective_date"], Value::Null);
        assert_eq!(fields["authority"], Value::Null);
    }

    #[test]
    fn test_conform_rejects_extraneous_fields() {
        let err = rates_schema()
            .conform(&payload(json!({ "rate": 1, "penalty": "none" })))
            .unwrap_err();

        assert_eq!(
            err.0,
            vec![SchemaIssue::Extraneous {
                field: "penalty".into()
            }]
        );
    }

    #[test]
    fn test_conform_reports_missing_required_and_wrong_type() {
        let err = rates_schema()
            .conform(&payload(json!({ "rate": "  ", "effective_date": "next tuesday" })))
            .unwrap_err();

        assert_eq!(err.len(), 2);
        assert!(err.to_string().contains("missing required field `rate`"));
        assert!(err.to_string().contains("`effective_date` expected date"));
    }

    #[test]
    fn test_conform_trims_and_coerces() {
        let fields = rates_schema()
            .conform(&payload(json!({
                "rate": "12.5",
                "effective_date": " 2025-01-01 ",
                "authority": "  Treasury  ",
            })))
            .unwrap();

        assert_eq!(fields["rate"], json!(12.5));
        assert_eq!(fields["effective_date"], json!("2025-01-01"));
        assert_eq!(fields["authority"], json!("Treasury"));
    }

    #[test]
    fn test_fingerprint_tracks_schema_changes() {
        let a = rates_schema();
        let b = rates_schema().with_field(FieldSpec::new("penalty", FieldKind::String));

        assert_eq!(a.fingerprint(), rates_schema().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_response_schema_lists_every_field() {
        let schema = rates_schema().response_json_schema();
        let required = schema["properties"]["fields"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
        assert_eq!(
            schema["properties"]["fields"]["properties"]["rate"]["type"],
            json!(["number", "null"])
        );
    }
}
