//! Filesystem blob store.
//!
//! Objects live at `{root}/{key}`. A write goes to a uniquely named temp file
//! in the target directory and is then linked into place, which fails if
//! the key already exists; readers never see a partial object and an
//! existing object is never replaced.

use async_trait::async_trait;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{PersistenceError, PersistenceResult};
use crate::traits::blob::{BlobKey, BlobRef, BlobStore};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &BlobKey) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

/// Write `bytes` to a temp file in `dir`, then link it to `path` without
/// replacing anything. The temp file is removed on every exit path.
fn stage_and_link(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map(|_| ()).map_err(|e| e.error)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> PersistenceResult<BlobRef> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| PersistenceError::InvalidKey { key: key.to_string() })?;
        fs::create_dir_all(dir)
            .await
            .map_err(PersistenceError::unavailable)?;

        let staged = {
            let dir = dir.to_path_buf();
            let path = path.clone();
            let bytes = bytes.to_vec();
            tokio::task::spawn_blocking(move || stage_and_link(&dir, &path, &bytes))
                .await
                .map_err(PersistenceError::unavailable)?
        };

        match staged {
            Ok(()) => {
                debug!(key = %key, bytes = bytes.len(), "Blob written");
                Ok(BlobRef {
                    key: key.clone(),
                    size: bytes.len() as u64,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PersistenceError::AlreadyExists {
                key: key.to_string(),
            }),
            Err(e) => Err(PersistenceError::unavailable(e)),
        }
    }

    async fn get(&self, blob: &BlobRef) -> PersistenceResult<Vec<u8>> {
        fs::read(self.path_for(&blob.key)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                PersistenceError::NotFound {
                    what: format!("blob {}", blob.key),
                }
            } else {
                PersistenceError::unavailable(e)
            }
        })
    }

    async fn exists(&self, key: &BlobKey) -> PersistenceResult<bool> {
        fs::try_exists(self.path_for(key))
            .await
            .map_err(PersistenceError::unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = BlobKey::for_capture(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let bytes: Vec<u8> = (0..=255u8).collect();

        let blob = store.put(&key, &bytes).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&blob).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_existing_object_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = BlobKey::new("raw/p/s/one").unwrap();

        let blob = store.put(&key, b"first").await.unwrap();
        let err = store.put(&key, b"second").await.unwrap_err();

        assert!(matches!(err, PersistenceError::AlreadyExists { .. }));
        assert_eq!(store.get(&blob).await.unwrap(), b"first");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("raw/p/s"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_stage_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // Linking onto a missing directory fails after the temp file is written.
        let target = dir.path().join("missing").join("blob");

        let err = stage_and_link(dir.path(), &target, b"partial").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let blob = BlobRef {
            key: BlobKey::new("raw/none").unwrap(),
            size: 0,
        };
        assert!(matches!(
            store.get(&blob).await,
            Err(PersistenceError::NotFound { .. })
        ));
    }
}
