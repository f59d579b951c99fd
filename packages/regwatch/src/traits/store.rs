//! Storage traits for revisions and the source catalog.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PersistenceResult;
use crate::types::{
    revision::{ChangeDiff, DataRevision, NewRevision, SearchHit},
    source::{Jurisdiction, Source},
};

/// Revision repository.
///
/// Revisions are append-only. `insert` commits the revision, its change diff
/// and its search representation in one atomic step.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Latest usable baseline (`status = captured`) for a source, by capture
    /// time then insertion order.
    async fn latest(&self, source_id: Uuid) -> PersistenceResult<Option<DataRevision>>;

    /// Commit a revision.
    ///
    /// Idempotent on `run_id`: if a revision for that run already exists it is
    /// returned unchanged. Fails with `Conflict` if `predecessor_id` no longer
    /// matches the latest baseline.
    async fn insert(&self, revision: &NewRevision) -> PersistenceResult<DataRevision>;

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<DataRevision>>;

    /// All revisions of a source, newest first.
    async fn history(&self, source_id: Uuid, limit: usize) -> PersistenceResult<Vec<DataRevision>>;

    /// Change diff recorded when `revision_id` was written, if any.
    async fn diff_for(&self, revision_id: Uuid) -> PersistenceResult<Option<ChangeDiff>>;

    /// Full-text search over blob keys and summaries, best match first.
    async fn search(&self, query: &str, limit: usize) -> PersistenceResult<Vec<SearchHit>>;
}

/// Read access to configured sources and jurisdictions.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn source(&self, id: Uuid) -> PersistenceResult<Option<Source>>;

    async fn jurisdiction(&self, id: Uuid) -> PersistenceResult<Option<Jurisdiction>>;
}
