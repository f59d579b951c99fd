//! End-to-end pipeline behaviour against in-memory backends.
//!
//! Covers the reuse/extract lifecycle of a source, per-source exclusivity,
//! retries at each stage, normalization audit revisions and cancellation.

use std::time::Duration;

use regwatch::testing::{rates_schema, TestHarness};
use regwatch::{
    digest, BlobKey, BlobRef, BlobStore, LockPolicy, PipelineConfig, RetryPolicy,
    RevisionStatus, RevisionStore, RunStatus,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_rate_change_lifecycle() {
    let harness = TestHarness::new().page("Rate: 10.00");
    let store = &harness.store;

    // First capture: extract, always a change
    let first = harness.pipeline.run(harness.source_id).await;
    assert_eq!(first.status, RunStatus::Extracted);
    assert_eq!(first.change_detected, Some(true));
    assert_eq!(first.digest, Some(digest("Rate: 10.00")));
    let calls_after_first = harness.extractor.call_count();
    assert_eq!(calls_after_first, 2);

    let first_rev = store.get(first.revision_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(first_rev.extracted_fields["rate"], json!(10.0));
    assert_eq!(first_rev.predecessor_id, None);

    // Same text: reuse, extractor untouched
    let second = harness.pipeline.run(harness.source_id).await;
    assert_eq!(second.status, RunStatus::Reused);
    assert_eq!(second.change_detected, Some(false));
    assert_eq!(second.digest, first.digest);
    assert_eq!(harness.extractor.call_count(), calls_after_first);

    let second_rev = store.get(second.revision_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(second_rev.extracted_fields, first_rev.extracted_fields);
    assert_eq!(second_rev.summary, first_rev.summary);
    assert_eq!(second_rev.predecessor_id, Some(first_rev.id));
    assert!(store.diff_for(second_rev.id).await.unwrap().is_none());

    // New rate: extract and diff
    harness.set_page("Rate: 12.00");
    let third = harness.pipeline.run(harness.source_id).await;
    assert_eq!(third.status, RunStatus::Extracted);
    assert_eq!(third.change_detected, Some(true));
    assert_ne!(third.digest, first.digest);

    let third_id = third.revision_id.unwrap();
    let diff = store.diff_for(third_id).await.unwrap().unwrap();
    assert_eq!(diff.old_revision_id, second_rev.id);
    assert_eq!(diff.diff.differing_keys(), vec!["rate".to_string()]);
    assert_eq!(diff.diff.changed["rate"].old, json!(10.0));
    assert_eq!(diff.diff.changed["rate"].new, json!(12.0));

    assert_eq!(store.latest(harness.source_id).await.unwrap().unwrap().id, third_id);
    assert_eq!(store.revision_count(), 3);
    assert_eq!(store.diff_count(), 1);
}

#[tokio::test]
async fn test_unchanged_fields_after_content_change_is_not_a_change() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.pipeline.run(harness.source_id).await;

    // Different text, same extracted fields
    harness.set_page("Rate: 10.00\nUpdated by the revenue department");
    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Extracted);
    assert_eq!(report.change_detected, Some(false));
    assert!(harness
        .store
        .diff_for(report.revision_id.unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_runs_are_serialised() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.fetcher.set_delay(Duration::from_millis(30));

    let (a, b) = tokio::join!(
        harness.pipeline.run(harness.source_id),
        harness.pipeline.run(harness.source_id)
    );

    let mut statuses = vec![a.status, b.status];
    statuses.sort_by_key(|s| s.to_string());
    assert_eq!(statuses, vec![RunStatus::Extracted, RunStatus::Reused]);

    let history = harness.store.history(harness.source_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].predecessor_id, Some(history[1].id));
    assert_eq!(history[1].predecessor_id, None);
}

#[tokio::test]
async fn test_skip_policy_skips_in_flight_source() {
    let harness = TestHarness::new()
        .page("Rate: 10.00")
        .config(TestHarness::default_config().with_lock_policy(LockPolicy::Skip));
    harness.fetcher.set_delay(Duration::from_millis(30));

    let (a, b) = tokio::join!(
        harness.pipeline.run(harness.source_id),
        harness.pipeline.run(harness.source_id)
    );

    let statuses = [a.status, b.status];
    assert!(statuses.contains(&RunStatus::Skipped));
    assert!(statuses.contains(&RunStatus::Extracted));
    assert_eq!(harness.fetcher.call_count(), 1);
    assert_eq!(harness.store.revision_count(), 1);
}

#[tokio::test]
async fn test_lost_commit_acknowledgement_writes_once() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.store.fail_after_commit(1);

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Extracted);
    assert_eq!(harness.store.insert_calls(), 2);
    assert_eq!(harness.store.revision_count(), 1);
}

#[tokio::test]
async fn test_persistence_retries_reuse_computed_revision() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.store.fail_before_commit(2);

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Extracted);
    assert_eq!(harness.store.insert_calls(), 3);
    assert_eq!(harness.store.revision_count(), 1);
    // Extraction ran once (two self-check calls), not once per write attempt
    assert_eq!(harness.extractor.call_count(), 2);
}

#[tokio::test]
async fn test_persistence_exhaustion_keeps_last_good_revision() {
    let harness = TestHarness::new().page("Rate: 10.00");
    let good = harness.pipeline.run(harness.source_id).await;

    harness.set_page("Rate: 12.00");
    harness.store.fail_before_commit(10);
    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Failed("persistence"));
    assert_eq!(report.attempts.extraction, 1);
    let latest = harness.store.latest(harness.source_id).await.unwrap().unwrap();
    assert_eq!(Some(latest.id), good.revision_id);
}

#[tokio::test]
async fn test_fetch_and_extraction_retries() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.fetcher.fail_next(2);
    harness.extractor.fail_next(1);

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Extracted);
    assert_eq!(report.attempts.fetch, 3);
    assert_eq!(report.attempts.extraction, 2);
}

#[tokio::test]
async fn test_determinism_violation_is_not_retried() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.extractor.set_flapping(true);

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(
        report.status,
        RunStatus::Failed("extraction_determinism_violation")
    );
    assert_eq!(report.attempts.extraction, 1);
    assert!(report.error.unwrap().contains("effective_date"));
    // Raw capture is archived even though no revision was written
    assert_eq!(harness.blobs.len(), 1);
    assert_eq!(harness.store.revision_count(), 0);
}

#[tokio::test]
async fn test_normalization_failure_writes_audit_revision() {
    let harness = TestHarness::new().page(b"Rate: \xc3\x28".to_vec());

    let report = harness.pipeline.run(harness.source_id).await;
    assert_eq!(report.status, RunStatus::Failed("normalization"));
    assert_eq!(harness.extractor.call_count(), 0);
    assert_eq!(harness.blobs.len(), 1);

    let audit = harness
        .store
        .get(report.revision_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audit.status, RevisionStatus::NormalizationFailed);
    assert!(audit.content_digest.is_none());
    assert!(audit.extracted_fields.is_empty());
    assert!(!audit.change_detected);
    assert!(harness.store.latest(harness.source_id).await.unwrap().is_none());

    // The next good capture is still the first baseline
    harness.set_page("Rate: 10.00");
    let next = harness.pipeline.run(harness.source_id).await;
    assert_eq!(next.status, RunStatus::Extracted);
    assert_eq!(next.change_detected, Some(true));
    assert_eq!(harness.store.history(harness.source_id, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_normalization_failure_recording_can_be_disabled() {
    let harness = TestHarness::new()
        .page(b"\xff\xff".to_vec())
        .config(TestHarness::default_config().with_record_normalization_failures(false));

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Failed("normalization"));
    assert!(report.revision_id.is_none());
    assert_eq!(harness.store.revision_count(), 0);
}

#[tokio::test]
async fn test_cancellation_during_fetch_writes_nothing() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.fetcher.set_delay(Duration::from_millis(200));
    let cancel = CancellationToken::new();

    let (report, _) = tokio::join!(
        harness.pipeline.run_with_cancel(harness.source_id, cancel.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        }
    );

    assert_eq!(report.status, RunStatus::Failed("cancelled"));
    assert!(harness.blobs.is_empty());
    assert_eq!(harness.store.revision_count(), 0);
    assert!(!harness.pipeline.locks().is_locked(harness.source_id));
}

#[tokio::test]
async fn test_inactive_and_unknown_sources_are_not_fetched() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.deactivate();

    let report = harness.pipeline.run(harness.source_id).await;
    assert_eq!(report.status, RunStatus::Failed("source_inactive"));

    let report = harness.pipeline.run(uuid::Uuid::new_v4()).await;
    assert_eq!(report.status, RunStatus::Failed("source_not_found"));

    assert_eq!(harness.fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_archived_capture_round_trips() {
    let body = "Rate: 10.00\n\u{00a0}Effective:   soon";
    let harness = TestHarness::new().page(body);

    let report = harness.pipeline.run(harness.source_id).await;
    let key = BlobKey::new(report.blob_key.unwrap()).unwrap();
    assert!(key.as_str().starts_with(&format!("raw/{}/{}/", harness.jurisdiction.project_id, harness.source_id)));

    let bytes = harness
        .blobs
        .get(&BlobRef {
            key,
            size: body.len() as u64,
        })
        .await
        .unwrap();
    assert_eq!(bytes, body.as_bytes());
}

#[tokio::test]
async fn test_schema_change_forces_extraction() {
    let mut harness = TestHarness::new().page("Rate: 10.00");
    harness.pipeline.run(harness.source_id).await;
    let calls = harness.extractor.call_count();

    harness.set_schema(rates_schema().with_instructions("Extract the combined state and local rate."));
    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Extracted);
    assert_eq!(report.change_detected, Some(false));
    assert!(harness.extractor.call_count() > calls);

    // Fingerprint now matches again
    let report = harness.pipeline.run(harness.source_id).await;
    assert_eq!(report.status, RunStatus::Reused);
}

#[tokio::test]
async fn test_revisions_are_searchable_by_summary() {
    let harness = TestHarness::new().page("Rate: 10.00");
    harness.pipeline.run(harness.source_id).await;

    let hits = harness.store.search("rates", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].revision.source_id, harness.source_id);
    assert!(harness.store.search("penalty", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_first_run_fails_cleanly_when_extractor_is_down() {
    let harness = TestHarness::new()
        .page("Rate: 10.00")
        .config(PipelineConfig::new().with_retry(RetryPolicy::immediate(2)));
    harness.extractor.fail_next(10);

    let report = harness.pipeline.run(harness.source_id).await;

    assert_eq!(report.status, RunStatus::Failed("extraction_unavailable"));
    assert_eq!(report.attempts.extraction, 2);
    assert_eq!(harness.blobs.len(), 1);
    assert_eq!(harness.store.revision_count(), 0);
}
