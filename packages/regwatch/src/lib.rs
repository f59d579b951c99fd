//! Regulatory Change Detection Library
//!
//! Watches government and legal sources, archives every raw capture, and
//! records an append-only history of structured extractions per source.
//! Extraction only runs when the normalized content (or the extraction
//! schema) actually changed; unchanged captures reuse the prior result.
//!
//! # Design Philosophy
//!
//! - Digest gates extraction: identical normalized text never reaches the model
//! - Determinism is checked, not assumed: the extractor is self-checked per run
//! - Revisions are immutable and strictly ordered per source
//! - Library handles mechanics, applications handle scheduling
//!
//! # Usage
//!
//! ```rust,ignore
//! use regwatch::{Pipeline, HttpFetcher, FsBlobStore, PostgresStore};
//! use regwatch::extraction::openai::OpenAiExtractor;
//!
//! let store = PostgresStore::new(&database_url).await?;
//! let pipeline = Pipeline::new(
//!     HttpFetcher::new(Duration::from_secs(30))?,
//!     FsBlobStore::new("./captures"),
//!     store,
//!     OpenAiExtractor::new(credentials)?,
//! );
//!
//! let report = pipeline.run(source_id).await;
//! println!("{}", report.status); // extracted | reused | skipped | failed:<kind>
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams for fetching, blob storage, revision storage and extraction
//! - [`types`] - Sources, captures, schemas and revisions
//! - [`normalize`], [`hash`], [`dedup`], [`diff`] - Pure pipeline stages
//! - [`extraction`] - Validated, self-checked extraction service
//! - [`writer`] - Invariant checks in front of the revision store
//! - [`pipeline`] - Orchestration, retries, per-source locks
//! - [`stores`] - In-memory, filesystem and Postgres storage
//! - [`fetchers`] - HTTP and rate-limited fetchers
//! - [`search`] - Search term derivation
//! - [`testing`] - Mock implementations for testing

pub mod dedup;
pub mod diff;
pub mod error;
pub mod extraction;
pub mod fetchers;
pub mod hash;
pub mod normalize;
pub mod pipeline;
pub mod search;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod writer;

// Re-export core types at crate root
pub use dedup::{decide, DedupDecision, ExtractReason};
pub use diff::{diff_fields, FieldDiff, ValueChange};
pub use error::{
    FetchError, NormalizationError, PersistenceError, PipelineError, Result,
};
pub use extraction::{Extraction, ExtractionService};
pub use fetchers::{HttpFetcher, RateLimitedFetcher};
pub use hash::{digest, ContentDigest};
pub use normalize::normalize;
pub use pipeline::{
    LockPolicy, Pipeline, PipelineConfig, RetryPolicy, RunReport, RunStatus, SourceLocks,
    StageAttempts,
};
pub use stores::{FsBlobStore, MemoryBlobStore, MemoryStore};
#[cfg(feature = "postgres")]
pub use stores::PostgresStore;
pub use traits::{
    blob::{BlobKey, BlobRef, BlobStore},
    extractor::{ExtractionRequest, Extractor, ExtractorError, RawExtraction},
    fetcher::Fetcher,
    store::{RevisionStore, SourceCatalog},
};
pub use types::{
    capture::{Charset, ContentHint, Markup, RawCapture},
    revision::{ChangeDiff, DataRevision, NewRevision, RevisionStatus, SearchHit},
    schema::{ExtractionSchema, FieldKind, FieldMap, FieldSpec, SchemaIssue, SchemaIssues},
    source::{Jurisdiction, Source, SourceKind},
};
pub use writer::RevisionWriter;
