//! Reuse-versus-extract decision.
//!
//! A pure function over the latest baseline revision and the freshly
//! computed digest. Reuse requires the digest and the schema fingerprint to
//! both match; anything else goes down the extract path.

use crate::hash::ContentDigest;
use crate::types::revision::DataRevision;

/// Why the extract path was taken despite a prior revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractReason {
    DigestChanged,
    SchemaChanged,
}

impl ExtractReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigestChanged => "digest_changed",
            Self::SchemaChanged => "schema_changed",
        }
    }
}

/// Outcome of the dedup decision.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    /// No baseline; extract and force `change_detected = true`
    FirstCapture,
    /// Content unchanged; copy the prior fields and summary
    Reuse { prior: DataRevision },
    /// Extract and diff against the prior fields
    Extract {
        prior: DataRevision,
        reason: ExtractReason,
    },
}

impl DedupDecision {
    pub fn prior(&self) -> Option<&DataRevision> {
        match self {
            Self::FirstCapture => None,
            Self::Reuse { prior } | Self::Extract { prior, .. } => Some(prior),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FirstCapture => "first_capture",
            Self::Reuse { .. } => "reuse",
            Self::Extract { reason, .. } => reason.as_str(),
        }
    }
}

/// Decide between the reuse and extract paths.
pub fn decide(
    prior: Option<DataRevision>,
    digest: &ContentDigest,
    schema_fingerprint: &str,
) -> DedupDecision {
    let Some(prior) = prior else {
        return DedupDecision::FirstCapture;
    };

    let digest_matches = prior.content_digest.as_deref() == Some(digest.as_str());
    let schema_matches = prior.schema_fingerprint.as_deref() == Some(schema_fingerprint);

    match (digest_matches, schema_matches) {
        (true, true) => DedupDecision::Reuse { prior },
        (true, false) => DedupDecision::Extract {
            prior,
            reason: ExtractReason::SchemaChanged,
        },
        (false, _) => DedupDecision::Extract {
            prior,
            reason: ExtractReason::DigestChanged,
        },
    }
}
