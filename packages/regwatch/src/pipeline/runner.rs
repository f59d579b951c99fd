//! Pipeline runner.
//!
//! One [`Pipeline::run`] call is one scheduled observation of a source:
//!
//! 1. resolve the source and its jurisdiction
//! 2. take the source lock (wait or skip, per [`LockPolicy`])
//! 3. fetch and archive the raw bytes
//! 4. normalize and hash
//! 5. read the latest baseline and decide reuse vs. extract
//! 6. extract and diff when needed
//! 7. write the revision (diff and search terms land in the same commit)
//!
//! Cancellation is honoured between stages up to the writer. Once the writer
//! starts it runs to completion under its own token, so a cancelled run never
//! leaves a half-written revision.

use std::fmt;

use chrono::SubsecRound;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dedup::{decide, DedupDecision};
use crate::diff::diff_fields;
use crate::error::{FetchError, PersistenceError, PipelineError, Result};
use crate::extraction::{Extraction, ExtractionService};
use crate::hash::{digest, ContentDigest};
use crate::normalize::normalize;
use crate::pipeline::config::{LockPolicy, PipelineConfig};
use crate::pipeline::locks::{SourceGuard, SourceLocks};
use crate::pipeline::retry::retry;
use crate::traits::{
    blob::{BlobKey, BlobRef, BlobStore},
    extractor::Extractor,
    fetcher::Fetcher,
    store::{RevisionStore, SourceCatalog},
};
use crate::types::{
    capture::{ContentHint, RawCapture},
    revision::{ChangeDiffDraft, DataRevision, NewRevision, RevisionStatus},
    schema::FieldMap,
    source::{Jurisdiction, Source, SourceKind},
};
use crate::writer::RevisionWriter;

/// Outcome of one run, as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Content changed (or first capture); extraction ran
    Extracted,
    /// Content unchanged; prior extraction copied forward
    Reused,
    /// Another run for the source was in flight
    Skipped,
    /// Run failed; carries the error kind
    Failed(&'static str),
}

impl RunStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extracted => f.write_str("extracted"),
            Self::Reused => f.write_str("reused"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(kind) => write!(f, "failed:{kind}"),
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Attempts used per retried stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageAttempts {
    pub fetch: u32,
    pub extraction: u32,
    pub persistence: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_id: Uuid,
    pub status: RunStatus,

    /// Revision written by this run (including a normalization audit revision)
    pub revision_id: Option<Uuid>,

    pub digest: Option<ContentDigest>,
    pub change_detected: Option<bool>,
    pub blob_key: Option<String>,
    pub attempts: StageAttempts,

    /// Error message when `status` is `Failed`
    pub error: Option<String>,
}

impl RunReport {
    fn new(run_id: Uuid, source_id: Uuid) -> Self {
        Self {
            run_id,
            source_id,
            status: RunStatus::Skipped,
            revision_id: None,
            digest: None,
            change_detected: None,
            blob_key: None,
            attempts: StageAttempts::default(),
            error: None,
        }
    }
}

/// Change-detection pipeline over pluggable fetch, storage and extraction
/// backends.
pub struct Pipeline<F, B, S, E> {
    fetcher: F,
    blobs: B,
    store: S,
    extraction: ExtractionService<E>,
    config: PipelineConfig,
    locks: SourceLocks,
}

impl<F, B, S, E> Pipeline<F, B, S, E>
where
    F: Fetcher,
    B: BlobStore,
    S: RevisionStore + SourceCatalog,
    E: Extractor,
{
    pub fn new(fetcher: F, blobs: B, store: S, extractor: E) -> Self {
        let config = PipelineConfig::default();
        let extraction = ExtractionService::new(extractor)
            .with_self_check_runs(config.self_check_runs)
            .with_timeout(config.extraction_timeout);
        Self {
            fetcher,
            blobs,
            store,
            extraction,
            config,
            locks: SourceLocks::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.extraction = self
            .extraction
            .with_self_check_runs(config.self_check_runs)
            .with_timeout(config.extraction_timeout);
        self.config = config;
        self
    }

    /// Share a lock map with other pipelines in the same process.
    pub fn with_locks(mut self, locks: SourceLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn extractor(&self) -> &E {
        self.extraction.extractor()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn locks(&self) -> &SourceLocks {
        &self.locks
    }

    /// Run the pipeline once for `source_id`.
    pub async fn run(&self, source_id: Uuid) -> RunReport {
        self.run_with_cancel(source_id, CancellationToken::new()).await
    }

    /// Run the pipeline once, stopping early if `cancel` fires before the
    /// writer starts.
    #[instrument(skip(self, cancel), fields(run_id))]
    pub async fn run_with_cancel(&self, source_id: Uuid, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let mut report = RunReport::new(run_id, source_id);
        match self.execute(&mut report, &cancel).await {
            Ok(()) => info!(
                status = %report.status,
                revision_id = ?report.revision_id,
                change_detected = ?report.change_detected,
                "Pipeline run finished"
            ),
            Err(e) => {
                report.status = RunStatus::Failed(e.kind());
                report.error = Some(e.to_string());
                if matches!(e, PipelineError::Cancelled) {
                    info!(status = %report.status, "Pipeline run cancelled");
                } else {
                    warn!(
                        status = %report.status,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Pipeline run failed"
                    );
                }
            }
        }
        report
    }

    async fn execute(&self, report: &mut RunReport, cancel: &CancellationToken) -> Result<()> {
        let (source, jurisdiction) = self.resolve(report.source_id).await?;

        let Some(_guard) = self.lock(source.id, cancel).await? else {
            debug!(source_id = %source.id, "Run already in flight, skipping");
            report.status = RunStatus::Skipped;
            return Ok(());
        };

        let (fetched, attempts) = retry(&self.config.fetch_retry, "fetch", cancel, |_| {
            self.fetch_once(&source.url)
        })
        .await;
        report.attempts.fetch = attempts;
        let capture = fetched?;

        let blob = self.archive(&source, &capture, report).await?;
        report.blob_key = Some(blob.key.to_string());

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let hint = ContentHint::resolve(expected_content_type(&source), &capture);
        let text = match normalize(&capture.bytes, hint) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    source_id = %source.id,
                    blob_key = %blob.key,
                    markup = ?hint.markup,
                    error = %e,
                    "Normalization failed"
                );
                if self.config.record_normalization_failures {
                    self.record_normalization_failure(&source, &capture, &blob, report, cancel)
                        .await;
                }
                return Err(e.into());
            }
        };

        let content_digest = digest(&text);
        report.digest = Some(content_digest.clone());
        let fingerprint = jurisdiction.schema.fingerprint();

        let prior = self.latest(source.id, report, cancel).await?;
        let decision = decide(prior, &content_digest, &fingerprint);
        debug!(
            source_id = %source.id,
            digest = %content_digest.short(),
            decision = decision.label(),
            "Dedup decision"
        );

        let instructions = Some(jurisdiction.instructions.as_str()).filter(|s| !s.trim().is_empty());
        let (fields, summary, confidence, change_detected, diff, status) = match &decision {
            DedupDecision::Reuse { prior } => (
                prior.extracted_fields.clone(),
                prior.summary.clone(),
                prior.confidence,
                false,
                None,
                RunStatus::Reused,
            ),
            DedupDecision::FirstCapture => {
                let extraction = self.extract(&text, &jurisdiction, instructions, report, cancel).await?;
                (
                    extraction.fields,
                    Some(extraction.summary),
                    Some(extraction.confidence),
                    true,
                    None,
                    RunStatus::Extracted,
                )
            }
            DedupDecision::Extract { prior, reason } => {
                let extraction = self.extract(&text, &jurisdiction, instructions, report, cancel).await?;
                let field_diff = diff_fields(&prior.extracted_fields, &extraction.fields);
                let changed = field_diff.is_changed();
                debug!(
                    source_id = %source.id,
                    reason = reason.as_str(),
                    changed_keys = ?field_diff.differing_keys(),
                    "Diffed against prior revision"
                );
                let draft = changed.then(|| ChangeDiffDraft {
                    old_revision_id: prior.id,
                    diff: field_diff,
                    confidence: Some(extraction.confidence),
                });
                (
                    extraction.fields,
                    Some(extraction.summary),
                    Some(extraction.confidence),
                    changed,
                    draft,
                    RunStatus::Extracted,
                )
            }
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let revision = NewRevision {
            id: Uuid::new_v4(),
            run_id: report.run_id,
            source_id: source.id,
            predecessor_id: decision.prior().map(|p| p.id),
            blob_key: blob.key.to_string(),
            content_digest: Some(content_digest.as_str().to_string()),
            schema_fingerprint: Some(fingerprint),
            extracted_fields: fields,
            summary,
            confidence,
            captured_at: match decision.prior() {
                Some(prior) => prior.successor_captured_at(capture.fetched_at),
                None => capture.fetched_at.trunc_subsecs(6),
            },
            change_detected,
            status: RevisionStatus::Captured,
            diff,
        };

        let committed = self.write(&revision, report).await?;
        report.revision_id = Some(committed.id);
        report.change_detected = Some(committed.change_detected);
        report.status = status;
        Ok(())
    }

    async fn resolve(&self, source_id: Uuid) -> Result<(Source, Jurisdiction)> {
        let source = self
            .store
            .source(source_id)
            .await?
            .ok_or(PipelineError::SourceNotFound { source_id })?;
        if !source.is_runnable() {
            return Err(PipelineError::SourceInactive { source_id });
        }

        let jurisdiction = self
            .store
            .jurisdiction(source.jurisdiction_id)
            .await?
            .ok_or(PipelineError::JurisdictionNotFound {
                jurisdiction_id: source.jurisdiction_id,
            })?;
        Ok((source, jurisdiction))
    }

    /// `None` means the source is busy and the policy is `Skip`.
    async fn lock(&self, source_id: Uuid, cancel: &CancellationToken) -> Result<Option<SourceGuard>> {
        match self.config.lock_policy {
            LockPolicy::Skip => Ok(self.locks.try_acquire(source_id)),
            LockPolicy::Wait => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                guard = self.locks.acquire(source_id) => Ok(Some(guard)),
            },
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<RawCapture> {
        let after = self.config.fetch_timeout;
        match tokio::time::timeout(after, self.fetcher.fetch(url)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                after,
            }
            .into()),
        }
    }

    async fn archive(
        &self,
        source: &Source,
        capture: &RawCapture,
        report: &mut RunReport,
    ) -> Result<BlobRef> {
        let key = BlobKey::for_capture(source.project_id, source.id, capture.fetched_at);
        let fallback = BlobKey::new(format!("{key}-{}", report.run_id))?;

        // Archiving is not cancellable: the capture must be kept either way.
        let never = CancellationToken::new();
        let (archived, attempts) = retry(&self.config.persistence_retry, "archive", &never, |_| {
            self.put_blob(&key, &fallback, &capture.bytes)
        })
        .await;
        report.attempts.persistence += attempts;

        let blob = archived?;
        debug!(source_id = %source.id, blob_key = %blob.key, size = blob.size, "Raw capture archived");
        Ok(blob)
    }

    async fn put_blob(&self, key: &BlobKey, fallback: &BlobKey, bytes: &[u8]) -> Result<BlobRef> {
        match self.blobs.put(key, bytes).await {
            Err(PersistenceError::AlreadyExists { .. }) => {
                warn!(blob_key = %key, fallback = %fallback, "Blob key taken, using run-scoped key");
                Ok(self.blobs.put(fallback, bytes).await?)
            }
            other => Ok(other?),
        }
    }

    async fn latest(
        &self,
        source_id: Uuid,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<Option<DataRevision>> {
        let (latest, attempts) = retry(&self.config.persistence_retry, "latest", cancel, |_| {
            self.latest_once(source_id)
        })
        .await;
        report.attempts.persistence += attempts;
        latest
    }

    async fn latest_once(&self, source_id: Uuid) -> Result<Option<DataRevision>> {
        Ok(self.store.latest(source_id).await?)
    }

    async fn extract(
        &self,
        text: &str,
        jurisdiction: &Jurisdiction,
        instructions: Option<&str>,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<Extraction> {
        let (extracted, attempts) =
            retry(&self.config.extraction_retry, "extraction", cancel, |_| {
                self.extraction.extract(text, &jurisdiction.schema, instructions)
            })
            .await;
        report.attempts.extraction = attempts;
        extracted
    }

    /// Persist `revision`, retrying transient failures with the same value.
    ///
    /// Runs under a fresh token: cancellation of the run does not reach here.
    async fn write(&self, revision: &NewRevision, report: &mut RunReport) -> Result<DataRevision> {
        let never = CancellationToken::new();
        let (written, attempts) = retry(&self.config.persistence_retry, "write", &never, |_| {
            self.write_once(revision)
        })
        .await;
        report.attempts.persistence += attempts;
        written
    }

    async fn write_once(&self, revision: &NewRevision) -> Result<DataRevision> {
        Ok(RevisionWriter::new(&self.store).write(revision).await?)
    }

    /// Write an audit revision for a capture that could not be normalized.
    ///
    /// Failures here are logged; the run reports the normalization error
    /// either way.
    async fn record_normalization_failure(
        &self,
        source: &Source,
        capture: &RawCapture,
        blob: &BlobRef,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) {
        let predecessor_id = match self.latest(source.id, report, cancel).await {
            Ok(latest) => latest.map(|r| r.id),
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Could not record normalization failure");
                return;
            }
        };

        let audit = NewRevision {
            id: Uuid::new_v4(),
            run_id: report.run_id,
            source_id: source.id,
            predecessor_id,
            blob_key: blob.key.to_string(),
            content_digest: None,
            schema_fingerprint: None,
            extracted_fields: FieldMap::new(),
            summary: None,
            confidence: None,
            captured_at: capture.fetched_at,
            change_detected: false,
            status: RevisionStatus::NormalizationFailed,
            diff: None,
        };

        match self.write(&audit, report).await {
            Ok(committed) => {
                report.revision_id = Some(committed.id);
                report.change_detected = Some(false);
            }
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Could not record normalization failure")
            }
        }
    }
}

/// Declared content type, defaulting API sources to JSON.
fn expected_content_type(source: &Source) -> Option<&str> {
    source
        .expected_content_type
        .as_deref()
        .or((source.kind == SourceKind::Api).then_some("application/json"))
}
