//! In-memory blob store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{PersistenceError, PersistenceResult};
use crate::traits::blob::{BlobKey, BlobRef, BlobStore};

/// Append-only blob store backed by a `HashMap`. Clones share contents.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<BlobKey, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<BlobKey> {
        let mut keys: Vec<BlobKey> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Corrupt("blob store lock poisoned".into())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> PersistenceResult<BlobRef> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        if objects.contains_key(key) {
            return Err(PersistenceError::AlreadyExists {
                key: key.to_string(),
            });
        }
        objects.insert(key.clone(), bytes.to_vec());
        Ok(BlobRef {
            key: key.clone(),
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, blob: &BlobRef) -> PersistenceResult<Vec<u8>> {
        self.objects
            .read()
            .map_err(|_| poisoned())?
            .get(&blob.key)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound {
                what: format!("blob {}", blob.key),
            })
    }

    async fn exists(&self, key: &BlobKey) -> PersistenceResult<bool> {
        Ok(self.objects.read().map_err(|_| poisoned())?.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_no_overwrite() {
        let store = MemoryBlobStore::new();
        let key = BlobKey::new("raw/p/s/20250101T000000.000000Z").unwrap();

        let blob = store.put(&key, b"<p>Rate: 10.00</p>").await.unwrap();
        assert_eq!(blob.size, 18);
        assert_eq!(store.get(&blob).await.unwrap(), b"<p>Rate: 10.00</p>");

        let err = store.put(&key, b"other").await.unwrap_err();
        assert!(matches!(err, PersistenceError::AlreadyExists { .. }));
        assert_eq!(store.get(&blob).await.unwrap(), b"<p>Rate: 10.00</p>");
    }
}
