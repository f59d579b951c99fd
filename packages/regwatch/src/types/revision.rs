//! Revision records: one immutable observation of a source.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::FieldDiff;
use crate::types::schema::FieldMap;

/// Whether a revision is a usable baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    /// Normalized, hashed and (re)extracted
    Captured,
    /// Raw bytes archived but could not be normalized; audit only
    NormalizationFailed,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "captured",
            Self::NormalizationFailed => "normalization_failed",
        }
    }
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RevisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "captured" => Ok(Self::Captured),
            "normalization_failed" => Ok(Self::NormalizationFailed),
            other => Err(format!("unknown revision status: {other}")),
        }
    }
}

/// A committed observation of a source at a point in time.
///
/// Never updated after insert. `search_terms` is derived by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRevision {
    pub id: Uuid,

    /// Pipeline run that produced this revision (idempotency key)
    pub run_id: Uuid,

    pub source_id: Uuid,

    /// Baseline this revision was decided against
    pub predecessor_id: Option<Uuid>,

    /// Key of the archived raw capture
    pub blob_key: String,

    /// SHA-256 hex of the normalized text; absent on normalization failures
    pub content_digest: Option<String>,

    /// Fingerprint of the schema the fields were extracted with
    pub schema_fingerprint: Option<String>,

    pub extracted_fields: FieldMap,

    pub summary: Option<String>,

    pub confidence: Option<f64>,

    pub captured_at: DateTime<Utc>,

    pub change_detected: bool,

    pub status: RevisionStatus,

    /// Normalized search representation of blob key + summary
    pub search_terms: Vec<String>,

    /// Store-assigned insertion order; breaks capture-time ties
    pub sequence: i64,
}

impl DataRevision {
    pub fn is_baseline(&self) -> bool {
        self.status == RevisionStatus::Captured
    }

    /// Capture time for a successor observed at `observed`.
    ///
    /// Truncated to the microsecond precision the stores keep, and at least
    /// one microsecond after this revision, so a clock that steps backwards
    /// cannot reorder the chain.
    pub fn successor_captured_at(&self, observed: DateTime<Utc>) -> DateTime<Utc> {
        observed
            .trunc_subsecs(6)
            .max(self.captured_at + Duration::microseconds(1))
    }
}

/// A revision ready to be committed, fully computed by the pipeline.
///
/// Persistence retries resubmit the same value, so everything here is
/// decided before the writer runs.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRevision {
    pub id: Uuid,
    pub run_id: Uuid,
    pub source_id: Uuid,
    pub predecessor_id: Option<Uuid>,
    pub blob_key: String,
    pub content_digest: Option<String>,
    pub schema_fingerprint: Option<String>,
    pub extracted_fields: FieldMap,
    pub summary: Option<String>,
    pub confidence: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub change_detected: bool,
    pub status: RevisionStatus,

    /// Field diff against the predecessor, written alongside the revision
    pub diff: Option<ChangeDiffDraft>,
}

impl NewRevision {
    /// Materialize the committed row once the store has assigned order and
    /// search terms.
    pub fn into_revision(self, search_terms: Vec<String>, sequence: i64) -> DataRevision {
        DataRevision {
            id: self.id,
            run_id: self.run_id,
            source_id: self.source_id,
            predecessor_id: self.predecessor_id,
            blob_key: self.blob_key,
            content_digest: self.content_digest,
            schema_fingerprint: self.schema_fingerprint,
            extracted_fields: self.extracted_fields,
            summary: self.summary,
            confidence: self.confidence,
            captured_at: self.captured_at,
            change_detected: self.change_detected,
            status: self.status,
            search_terms,
            sequence,
        }
    }
}

/// Diff payload computed before the write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDiffDraft {
    pub old_revision_id: Uuid,
    pub diff: FieldDiff,
    pub confidence: Option<f64>,
}

/// Persisted field-level change between two revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDiff {
    pub id: Uuid,
    pub new_revision_id: Uuid,
    pub old_revision_id: Uuid,
    pub diff: FieldDiff,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Full-text search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub revision: DataRevision,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn captured_at(at: DateTime<Utc>) -> DataRevision {
        NewRevision {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            predecessor_id: None,
            blob_key: "raw/p/s/t".into(),
            content_digest: None,
            schema_fingerprint: None,
            extracted_fields: FieldMap::new(),
            summary: None,
            confidence: None,
            captured_at: at,
            change_detected: true,
            status: RevisionStatus::Captured,
            diff: None,
        }
        .into_revision(Vec::new(), 1)
    }

    #[test]
    fn test_successor_follows_predecessor_when_clock_steps_back() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let prior = captured_at(at);

        assert_eq!(
            prior.successor_captured_at(at - Duration::seconds(1)),
            at + Duration::microseconds(1)
        );
        assert_eq!(prior.successor_captured_at(at), at + Duration::microseconds(1));
        assert_eq!(
            prior.successor_captured_at(at + Duration::seconds(5)),
            at + Duration::seconds(5)
        );
    }

    #[test]
    fn test_successor_is_truncated_to_microseconds() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let prior = captured_at(at);
        let observed = at + Duration::nanoseconds(10_000_500);

        assert_eq!(
            prior.successor_captured_at(observed),
            at + Duration::microseconds(10_000)
        );
    }
}
