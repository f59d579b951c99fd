//! Testing utilities including mock implementations.
//!
//! These let applications and integration tests drive the full pipeline
//! without network access, a database or a model backend. All mocks are
//! `Clone` and clones share state, so a test can hand one copy to the
//! pipeline and keep another for assertions.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{FetchError, FetchResult, PersistenceError, PersistenceResult};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::stores::{MemoryBlobStore, MemoryStore};
use crate::traits::{
    extractor::{ExtractionRequest, Extractor, ExtractorError, RawExtraction},
    fetcher::Fetcher,
    store::{RevisionStore, SourceCatalog},
};
use crate::types::{
    capture::RawCapture,
    revision::{ChangeDiff, DataRevision, NewRevision, SearchHit},
    schema::{ExtractionSchema, FieldKind, FieldSpec},
    source::{Jurisdiction, Source},
};

/// Take one pending failure from the counter, if any is left.
fn take(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone)]
struct MockPage {
    body: Vec<u8>,
    content_type: Option<String>,
}

/// A mock fetcher serving predefined pages.
///
/// Unknown URLs answer 404. `fail_next(n)` makes the next `n` fetches fail
/// with a retryable 503.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, MockPage>>>,
    failures: Arc<AtomicU32>,
    delay: Arc<RwLock<Duration>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    pub fn with_page(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.set_page(url, body);
        self
    }

    /// Serve `body` at `url` with a `Content-Type` header.
    pub fn with_typed_page(
        self,
        url: impl Into<String>,
        body: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        self.pages.write().unwrap().insert(
            url.into(),
            MockPage {
                body: body.into(),
                content_type: Some(content_type.into()),
            },
        );
        self
    }

    /// Replace the page served at `url`.
    pub fn set_page(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.pages.write().unwrap().insert(
            url.into(),
            MockPage {
                body: body.into(),
                content_type: None,
            },
        );
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap() = delay;
    }

    /// Fail the next `n` fetches with HTTP 503.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<RawCapture> {
        self.calls.write().unwrap().push(url.to_string());

        let delay = *self.delay.read().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take(&self.failures) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let page = self.pages.read().unwrap().get(url).cloned();
        let page = page.ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        Ok(RawCapture {
            final_url: url.to_string(),
            bytes: page.body,
            content_type: page.content_type,
            status: 200,
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock extractor that reads `Label: value` lines.
///
/// Each line becomes a snake_case key; values that parse as numbers become
/// JSON numbers, everything else a string. The summary is the first line of
/// the document. Output is a pure function of the input unless
/// [`flapping`](Self::flapping) is on, in which case every second call adds an
/// `effective_date` the first call did not report.
#[derive(Clone, Default)]
pub struct MockExtractor {
    calls: Arc<AtomicUsize>,
    failures: Arc<AtomicU32>,
    flapping: Arc<AtomicBool>,
    delay: Arc<RwLock<Duration>>,
    requests: Arc<RwLock<Vec<ExtractionRequest>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flapping(self) -> Self {
        self.set_flapping(true);
        self
    }

    pub fn set_flapping(&self, flapping: bool) {
        self.flapping.store(flapping, Ordering::SeqCst);
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write().unwrap() = delay;
        self
    }

    /// Fail the next `n` calls as unavailable.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.read().unwrap().clone()
    }
}

fn snake_case(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn mock_fields(text: &str) -> Map<String, Value> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .filter_map(|(label, value)| {
            let key = snake_case(label);
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let value = value
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(value.to_string()));
            Some((key, value))
        })
        .collect()
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.write().unwrap().push(request.clone());

        let delay = *self.delay.read().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take(&self.failures) {
            return Err(ExtractorError::Unavailable("mock outage".into()));
        }

        let mut fields = mock_fields(&request.normalized_text);
        if self.flapping.load(Ordering::SeqCst) && call % 2 == 1 {
            fields.insert("effective_date".into(), Value::String("2025-01-01".into()));
        }

        let summary = request
            .normalized_text
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(RawExtraction {
            fields,
            summary,
            confidence: 0.9,
        })
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// A [`MemoryStore`] whose `insert` can be made to fail on demand.
///
/// `fail_before_commit(n)` fails the next `n` inserts without writing;
/// `fail_after_commit(n)` commits and then reports a lost connection, the
/// case idempotent retries exist for.
#[derive(Clone, Default)]
pub struct FlakyRevisionStore {
    inner: MemoryStore,
    before_commit: Arc<AtomicU32>,
    after_commit: Arc<AtomicU32>,
    inserts: Arc<AtomicU32>,
}

impl FlakyRevisionStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_before_commit(&self, n: u32) {
        self.before_commit.store(n, Ordering::SeqCst);
    }

    pub fn fail_after_commit(&self, n: u32) {
        self.after_commit.store(n, Ordering::SeqCst);
    }

    /// `insert` calls, including failed ones.
    pub fn insert_calls(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn revision_count(&self) -> usize {
        self.inner.revision_count()
    }

    pub fn diff_count(&self) -> usize {
        self.inner.diff_count()
    }
}

fn injected(what: &str) -> PersistenceError {
    PersistenceError::unavailable(std::io::Error::other(what.to_string()))
}

#[async_trait]
impl RevisionStore for FlakyRevisionStore {
    async fn latest(&self, source_id: Uuid) -> PersistenceResult<Option<DataRevision>> {
        self.inner.latest(source_id).await
    }

    async fn insert(&self, revision: &NewRevision) -> PersistenceResult<DataRevision> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if take(&self.before_commit) {
            return Err(injected("connection refused"));
        }
        let committed = self.inner.insert(revision).await?;
        if take(&self.after_commit) {
            return Err(injected("connection reset after commit"));
        }
        Ok(committed)
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<DataRevision>> {
        self.inner.get(id).await
    }

    async fn history(&self, source_id: Uuid, limit: usize) -> PersistenceResult<Vec<DataRevision>> {
        self.inner.history(source_id, limit).await
    }

    async fn diff_for(&self, revision_id: Uuid) -> PersistenceResult<Option<ChangeDiff>> {
        self.inner.diff_for(revision_id).await
    }

    async fn search(&self, query: &str, limit: usize) -> PersistenceResult<Vec<SearchHit>> {
        self.inner.search(query, limit).await
    }
}

#[async_trait]
impl SourceCatalog for FlakyRevisionStore {
    async fn source(&self, id: Uuid) -> PersistenceResult<Option<Source>> {
        self.inner.source(id).await
    }

    async fn jurisdiction(&self, id: Uuid) -> PersistenceResult<Option<Jurisdiction>> {
        self.inner.jurisdiction(id).await
    }
}

/// Pipeline wired entirely to in-memory mocks.
pub type MockPipeline = Pipeline<MockFetcher, MemoryBlobStore, FlakyRevisionStore, MockExtractor>;

/// Schema used by the harness: a required `rate` and an optional
/// `effective_date`.
pub fn rates_schema() -> ExtractionSchema {
    ExtractionSchema::new("sales_tax_rates")
        .with_instructions("Extract the current sales tax rate.")
        .with_field(
            FieldSpec::new("rate", FieldKind::Number)
                .required()
                .with_description("Rate in percent"),
        )
        .with_field(FieldSpec::new("effective_date", FieldKind::Date))
}

/// One jurisdiction, one source and an in-memory pipeline around them.
///
/// Retries are immediate so failure tests do not sleep.
pub struct TestHarness {
    pub pipeline: MockPipeline,
    pub fetcher: MockFetcher,
    pub extractor: MockExtractor,
    pub blobs: MemoryBlobStore,
    pub store: FlakyRevisionStore,
    pub jurisdiction: Jurisdiction,
    pub source_id: Uuid,
    pub url: String,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub const URL: &'static str = "https://revenue.example.gov/sales-tax/rates";

    pub fn new() -> Self {
        let memory = MemoryStore::new();
        let jurisdiction = Jurisdiction::new(Uuid::new_v4(), "Minnesota", rates_schema());
        let source = Source::new(jurisdiction.project_id, jurisdiction.id, "Sales tax rates", Self::URL)
            .with_expected_content_type("text/plain");
        let source_id = source.id;
        memory.add_jurisdiction(jurisdiction.clone()).unwrap();
        memory.add_source(source).unwrap();

        let fetcher = MockFetcher::new();
        let extractor = MockExtractor::new();
        let blobs = MemoryBlobStore::new();
        let store = FlakyRevisionStore::new(memory);

        let pipeline = Pipeline::new(fetcher.clone(), blobs.clone(), store.clone(), extractor.clone())
            .with_config(Self::default_config());

        Self {
            pipeline,
            fetcher,
            extractor,
            blobs,
            store,
            jurisdiction,
            source_id,
            url: Self::URL.to_string(),
        }
    }

    pub fn default_config() -> PipelineConfig {
        PipelineConfig::new().with_retry(crate::pipeline::RetryPolicy::immediate(3))
    }

    /// Serve `body` at the harness source's URL.
    pub fn page(self, body: impl Into<Vec<u8>>) -> Self {
        self.set_page(body);
        self
    }

    pub fn set_page(&self, body: impl Into<Vec<u8>>) {
        self.fetcher.set_page(self.url.clone(), body);
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.pipeline = self.pipeline.with_config(config);
        self
    }

    /// Replace the jurisdiction's schema, as a configuration edit would.
    pub fn set_schema(&mut self, schema: ExtractionSchema) {
        self.jurisdiction.schema = schema;
        self.store
            .memory()
            .update_jurisdiction(self.jurisdiction.clone())
            .unwrap();
    }

    pub fn deactivate(&self) {
        self.store
            .memory()
            .set_source_active(self.source_id, false)
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mock_fields() {
        let fields = mock_fields("Rate: 10.00\nEffective Date: 2025-01-01\nnoise");
        assert_eq!(fields["rate"], json!(10.0));
        assert_eq!(fields["effective_date"], json!("2025-01-01"));
        assert_eq!(fields.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_fetcher_failures_then_page() {
        let fetcher = MockFetcher::new().with_page("https://a.gov", "x");
        fetcher.fail_next(1);

        assert!(fetcher.fetch("https://a.gov").await.is_err());
        assert_eq!(fetcher.fetch("https://a.gov").await.unwrap().bytes, b"x");
        assert!(matches!(
            fetcher.fetch("https://b.gov").await,
            Err(FetchError::Status { status: 404, .. })
        ));
        assert_eq!(fetcher.call_count(), 3);
    }
}
