//! Extractor trait: the structured-extraction model boundary.
//!
//! An `Extractor` makes one call to a model and returns whatever it said.
//! Validation, schema conformance and the determinism self-check live in
//! [`ExtractionService`](crate::extraction::ExtractionService).

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::schema::ExtractionSchema;

/// Input to one extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub normalized_text: String,
    pub schema: ExtractionSchema,
    /// Jurisdiction-specific instructions appended to the schema's own
    pub instructions: Option<String>,
}

/// Unvalidated model output.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction {
    pub fields: Map<String, Value>,
    pub summary: String,
    pub confidence: f64,
}

/// Failure of a single extraction call.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Backend unreachable, rate limited or errored
    #[error("extraction backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but the payload was empty or unparseable
    #[error("invalid extraction payload: {0}")]
    InvalidPayload(String),

    /// Call exceeded its deadline
    #[error("extraction timed out")]
    Timeout,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractorError>;

    /// Model identifier, for logs.
    fn model(&self) -> &str {
        "unknown"
    }
}
