//! Revision writer.
//!
//! Checks a fully computed [`NewRevision`] against the revision invariants and
//! hands it to the store, which commits the row, its change diff and its
//! search representation atomically. Retrying `write` with the same value is
//! safe: the store deduplicates on `run_id`.

use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};
use crate::hash::DIGEST_HEX_LEN;
use crate::traits::store::RevisionStore;
use crate::types::revision::{DataRevision, NewRevision, RevisionStatus};

pub struct RevisionWriter<'a, S: RevisionStore> {
    store: &'a S,
}

impl<'a, S: RevisionStore> RevisionWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn write(&self, revision: &NewRevision) -> PersistenceResult<DataRevision> {
        validate(revision)?;

        debug!(run_id = %revision.run_id, revision_id = %revision.id, "Writing revision");
        let committed = self.store.insert(revision).await?;
        info!(
            source_id = %committed.source_id,
            revision_id = %committed.id,
            seq = committed.sequence,
            status = %committed.status,
            change_detected = committed.change_detected,
            "Revision written"
        );
        Ok(committed)
    }
}

/// Reject revisions that would break the stored invariants.
pub fn validate(revision: &NewRevision) -> PersistenceResult<()> {
    let invalid = |msg: &str| {
        Err(PersistenceError::Corrupt(format!(
            "refusing to write revision {}: {msg}",
            revision.id
        )))
    };

    match revision.status {
        RevisionStatus::Captured => {
            match revision.content_digest.as_deref() {
                Some(d) if d.len() == DIGEST_HEX_LEN => {}
                _ => return invalid("captured revision needs a content digest"),
            }
            if revision.schema_fingerprint.is_none() {
                return invalid("captured revision needs a schema fingerprint");
            }
            if revision.predecessor_id.is_none() && !revision.change_detected {
                return invalid("first revision must be marked changed");
            }
        }
        RevisionStatus::NormalizationFailed => {
            if revision.content_digest.is_some()
                || !revision.extracted_fields.is_empty()
                || revision.change_detected
                || revision.diff.is_some()
            {
                return invalid("normalization-failure revision carries extraction data");
            }
        }
    }

    if let Some(diff) = &revision.diff {
        if Some(diff.old_revision_id) != revision.predecessor_id {
            return invalid("change diff is not against the predecessor");
        }
        if diff.diff.is_changed() != revision.change_detected {
            return invalid("change flag disagrees with the diff");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FieldDiff;
    use crate::hash::digest;
    use crate::stores::MemoryStore;
    use crate::types::revision::ChangeDiffDraft;
    use crate::types::schema::FieldMap;
    use chrono::Utc;
    use uuid::Uuid;

    fn captured() -> NewRevision {
        NewRevision {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            predecessor_id: None,
            blob_key: "raw/p/s/t".into(),
            content_digest: Some(digest("Rate: 10.00").into_string()),
            schema_fingerprint: Some("fp".into()),
            extracted_fields: FieldMap::new(),
            summary: Some("Rate is 10".into()),
            confidence: Some(0.9),
            captured_at: Utc::now(),
            change_detected: true,
            status: RevisionStatus::Captured,
            diff: None,
        }
    }

    #[test]
    fn test_first_revision_must_be_changed() {
        let mut rev = captured();
        assert!(validate(&rev).is_ok());
        rev.change_detected = false;
        assert!(validate(&rev).is_err());
    }

    #[test]
    fn test_diff_must_match_predecessor() {
        let mut rev = captured();
        rev.predecessor_id = Some(Uuid::new_v4());
        rev.change_detected = false;
        rev.diff = Some(ChangeDiffDraft {
            old_revision_id: Uuid::new_v4(),
            diff: FieldDiff::default(),
            confidence: None,
        });
        assert!(validate(&rev).is_err());
    }

    #[test]
    fn test_audit_revision_is_empty() {
        let mut rev = captured();
        rev.status = RevisionStatus::NormalizationFailed;
        assert!(validate(&rev).is_err());

        rev.content_digest = None;
        rev.change_detected = false;
        assert!(validate(&rev).is_ok());
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let store = MemoryStore::new();
        let writer = RevisionWriter::new(&store);
        let rev = captured();

        let a = writer.write(&rev).await.unwrap();
        let b = writer.write(&rev).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.revision_count(), 1);
    }
}
