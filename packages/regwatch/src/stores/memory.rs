//! In-memory storage for tests and development.
//!
//! One `RwLock` guards all tables, so `insert` is trivially atomic: the
//! revision, its change diff and its search terms appear together or not at
//! all. Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::search::{score, search_document, search_terms};
use crate::traits::store::{RevisionStore, SourceCatalog};
use crate::types::{
    revision::{ChangeDiff, DataRevision, NewRevision, RevisionStatus, SearchHit},
    source::{Jurisdiction, Source},
};

#[derive(Default)]
struct State {
    sources: HashMap<Uuid, Source>,
    jurisdictions: HashMap<Uuid, Jurisdiction>,
    /// Insertion order
    revisions: Vec<DataRevision>,
    /// Keyed by `new_revision_id`
    diffs: HashMap<Uuid, ChangeDiff>,
    next_sequence: i64,
}

impl State {
    fn latest(&self, source_id: Uuid) -> Option<&DataRevision> {
        self.revisions
            .iter()
            .filter(|r| r.source_id == source_id && r.is_baseline())
            .max_by_key(|r| (r.captured_at, r.sequence))
    }
}

/// Revision store and source catalog held in memory.
///
/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PersistenceResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| PersistenceError::Corrupt("memory store lock poisoned".into()))
    }

    fn write(&self) -> PersistenceResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| PersistenceError::Corrupt("memory store lock poisoned".into()))
    }

    pub fn add_jurisdiction(&self, jurisdiction: Jurisdiction) -> PersistenceResult<()> {
        self.write()?
            .jurisdictions
            .insert(jurisdiction.id, jurisdiction);
        Ok(())
    }

    pub fn add_source(&self, source: Source) -> PersistenceResult<()> {
        self.write()?.sources.insert(source.id, source);
        Ok(())
    }

    /// Replace a jurisdiction's extraction schema, as a configuration edit would.
    pub fn update_jurisdiction(&self, jurisdiction: Jurisdiction) -> PersistenceResult<()> {
        self.add_jurisdiction(jurisdiction)
    }

    pub fn set_source_active(&self, source_id: Uuid, active: bool) -> PersistenceResult<()> {
        let mut state = self.write()?;
        let source = state
            .sources
            .get_mut(&source_id)
            .ok_or_else(|| PersistenceError::NotFound {
                what: format!("source {source_id}"),
            })?;
        source.is_active = active;
        Ok(())
    }

    /// Number of committed revisions across all sources.
    pub fn revision_count(&self) -> usize {
        self.read().map(|s| s.revisions.len()).unwrap_or(0)
    }

    /// Number of committed change diffs.
    pub fn diff_count(&self) -> usize {
        self.read().map(|s| s.diffs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RevisionStore for MemoryStore {
    async fn latest(&self, source_id: Uuid) -> PersistenceResult<Option<DataRevision>> {
        Ok(self.read()?.latest(source_id).cloned())
    }

    async fn insert(&self, revision: &NewRevision) -> PersistenceResult<DataRevision> {
        let mut state = self.write()?;

        if let Some(existing) = state.revisions.iter().find(|r| r.run_id == revision.run_id) {
            return Ok(existing.clone());
        }

        if revision.status == RevisionStatus::Captured {
            let current = state.latest(revision.source_id);
            if current.map(|r| r.id) != revision.predecessor_id {
                return Err(PersistenceError::Conflict {
                    source_id: revision.source_id,
                    expected: revision.predecessor_id,
                    actual: current.map(|r| r.id),
                });
            }
            if let Some(predecessor) = current {
                if revision.captured_at <= predecessor.captured_at {
                    return Err(PersistenceError::OutOfOrder {
                        revision_id: revision.id,
                        captured_at: revision.captured_at,
                        predecessor_captured_at: predecessor.captured_at,
                    });
                }
            }
        }

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let terms = search_terms(&search_document(
            &revision.blob_key,
            revision.summary.as_deref(),
        ));

        let committed = revision.clone().into_revision(terms, sequence);
        if let Some(draft) = &revision.diff {
            state.diffs.insert(
                committed.id,
                ChangeDiff {
                    id: Uuid::new_v4(),
                    new_revision_id: committed.id,
                    old_revision_id: draft.old_revision_id,
                    diff: draft.diff.clone(),
                    confidence: draft.confidence,
                    created_at: Utc::now(),
                },
            );
        }
        state.revisions.push(committed.clone());

        Ok(committed)
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<DataRevision>> {
        Ok(self.read()?.revisions.iter().find(|r| r.id == id).cloned())
    }

    async fn history(&self, source_id: Uuid, limit: usize) -> PersistenceResult<Vec<DataRevision>> {
        let state = self.read()?;
        let mut revisions: Vec<DataRevision> = state
            .revisions
            .iter()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect();
        revisions.sort_by(|a, b| (b.captured_at, b.sequence).cmp(&(a.captured_at, a.sequence)));
        revisions.truncate(limit);
        Ok(revisions)
    }

    async fn diff_for(&self, revision_id: Uuid) -> PersistenceResult<Option<ChangeDiff>> {
        Ok(self.read()?.diffs.get(&revision_id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> PersistenceResult<Vec<SearchHit>> {
        let state = self.read()?;
        let mut hits: Vec<SearchHit> = state
            .revisions
            .iter()
            .filter_map(|r| {
                let s = score(&r.search_terms, query);
                (s > 0.0).then(|| SearchHit {
                    revision: r.clone(),
                    score: s,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.revision.sequence.cmp(&a.revision.sequence))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl SourceCatalog for MemoryStore {
    async fn source(&self, id: Uuid) -> PersistenceResult<Option<Source>> {
        Ok(self.read()?.sources.get(&id).cloned())
    }

    async fn jurisdiction(&self, id: Uuid) -> PersistenceResult<Option<Jurisdiction>> {
        Ok(self.read()?.jurisdictions.get(&id).cloned())
    }
}
