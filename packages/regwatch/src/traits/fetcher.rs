//! Fetcher trait: bytes from a source URL, no interpretation.

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::types::capture::RawCapture;

/// Retrieves the raw bytes of a source.
///
/// Implementations must not decode, clean or cache the body; the pipeline
/// archives exactly what was returned.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` once. Retries are the caller's job.
    async fn fetch(&self, url: &str) -> FetchResult<RawCapture>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "fetcher"
    }
}
