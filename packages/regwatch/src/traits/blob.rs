//! Append-only blob storage for raw captures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};

/// Validated, relative, `/`-separated object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> PersistenceResult<Self> {
        let key = key.into();
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && !key.contains('\\')
            && key
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if valid {
            Ok(Self(key))
        } else {
            Err(PersistenceError::InvalidKey { key })
        }
    }

    /// `raw/{project}/{source}/{YYYYMMDDTHHMMSS.ffffffZ}`.
    ///
    /// Human-navigable, sorts by capture time within a source, and is unique
    /// as long as a source is not captured twice in the same microsecond.
    pub fn for_capture(project_id: Uuid, source_id: Uuid, captured_at: DateTime<Utc>) -> Self {
        Self(format!(
            "raw/{}/{}/{}",
            project_id,
            source_id,
            captured_at.format("%Y%m%dT%H%M%S%.6fZ")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobKey {
    type Error = PersistenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}

/// Handle returned by [`BlobStore::put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub key: BlobKey,
    pub size: u64,
}

/// Append-only object store.
///
/// `put` never overwrites: writing an existing key fails with
/// [`PersistenceError::AlreadyExists`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> PersistenceResult<BlobRef>;

    async fn get(&self, blob: &BlobRef) -> PersistenceResult<Vec<u8>>;

    async fn exists(&self, key: &BlobKey) -> PersistenceResult<bool>;
}
