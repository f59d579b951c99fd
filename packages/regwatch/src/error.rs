//! Typed errors for the change-detection pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Every pipeline error
//! knows whether the orchestration layer may retry it and has a stable kind
//! string that ends up in the `failed:<kind>` run status.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::types::schema::SchemaIssues;

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source could not be fetched
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Raw bytes could not be turned into plain text
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// Extraction backend unavailable or returned an empty/invalid payload
    #[error("extraction unavailable: {reason}")]
    ExtractionUnavailable { reason: String },

    /// Two invocations on identical input produced different field mappings
    #[error(
        "extraction is not deterministic; differing fields: {}",
        .differing_keys.join(", ")
    )]
    ExtractionDeterminismViolation {
        first_keys: Vec<String>,
        second_keys: Vec<String>,
        differing_keys: Vec<String>,
    },

    /// Extraction output does not conform to the declared schema
    #[error("extraction output violates schema `{schema}`: {issues}")]
    ExtractionSchemaViolation { schema: String, issues: SchemaIssues },

    /// Storage operation failed
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// Source id is unknown
    #[error("source not found: {source_id}")]
    SourceNotFound { source_id: Uuid },

    /// Jurisdiction referenced by a source is unknown
    #[error("jurisdiction not found: {jurisdiction_id}")]
    JurisdictionNotFound { jurisdiction_id: Uuid },

    /// Source is deactivated or soft-deleted
    #[error("source is inactive: {source_id}")]
    SourceInactive { source_id: Uuid },

    /// Run was cancelled before the writer started
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the orchestration layer may retry the failed stage.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::ExtractionUnavailable { .. } => true,
            Self::Persistence(e) => e.is_retryable(),
            Self::Normalization(_)
            | Self::ExtractionDeterminismViolation { .. }
            | Self::ExtractionSchemaViolation { .. }
            | Self::SourceNotFound { .. }
            | Self::JurisdictionNotFound { .. }
            | Self::SourceInactive { .. }
            | Self::Cancelled => false,
        }
    }

    /// Stable identifier used in run statuses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Normalization(_) => "normalization",
            Self::ExtractionUnavailable { .. } => "extraction_unavailable",
            Self::ExtractionDeterminismViolation { .. } => "extraction_determinism_violation",
            Self::ExtractionSchemaViolation { .. } => "extraction_schema_violation",
            Self::Persistence(_) => "persistence",
            Self::SourceNotFound { .. } => "source_not_found",
            Self::JurisdictionNotFound { .. } => "jurisdiction_not_found",
            Self::SourceInactive { .. } => "source_inactive",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors that can occur while fetching a source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is malformed or uses a scheme we refuse to fetch
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Request did not complete in time
    #[error("timeout fetching {url} after {after:?}")]
    Timeout { url: String, after: Duration },
}

impl FetchError {
    /// Client errors other than 408/429 will not fix themselves on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. } => false,
            Self::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Http(_) | Self::Timeout { .. } => true,
        }
    }
}

/// Raw bytes could not be decoded or parsed into plain text.
///
/// Carries the byte length and a truncated lossy sample for diagnostics.
#[derive(Debug, Error)]
#[error("normalization failed ({reason}); {byte_len} bytes, sample: {sample:?}")]
pub struct NormalizationError {
    pub reason: String,
    pub byte_len: usize,
    pub sample: String,
}

/// Number of raw bytes kept in a normalization error sample.
pub const NORMALIZATION_SAMPLE_BYTES: usize = 64;

impl NormalizationError {
    pub fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        let end = raw.len().min(NORMALIZATION_SAMPLE_BYTES);
        Self {
            reason: reason.into(),
            byte_len: raw.len(),
            sample: String::from_utf8_lossy(&raw[..end]).into_owned(),
        }
    }
}

/// Errors from the revision repository and blob store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Backend unreachable or the operation failed transiently
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Latest revision moved since the writer's predecessor was read
    #[error("revision conflict for source {source_id}: expected predecessor {expected:?}, found {actual:?}")]
    Conflict {
        source_id: Uuid,
        expected: Option<Uuid>,
        actual: Option<Uuid>,
    },

    /// Captured timestamp does not follow the predecessor's
    #[error("revision {revision_id} captured at {captured_at} does not follow its predecessor ({predecessor_captured_at})")]
    OutOfOrder {
        revision_id: Uuid,
        captured_at: chrono::DateTime<chrono::Utc>,
        predecessor_captured_at: chrono::DateTime<chrono::Utc>,
    },

    /// Blob key already written (blob store is append-only)
    #[error("blob already exists: {key}")]
    AlreadyExists { key: String },

    /// Blob key escapes the store root or is otherwise unusable
    #[error("invalid blob key: {key}")]
    InvalidKey { key: String },

    /// Requested object does not exist
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Stored data could not be decoded
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    pub fn unavailable(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Box::new(e))
    }

    /// Only transient backend failures are retried with identical inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for storage operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;
