//! File-backed snapshot store.
//!
//! Older deployments persisted the in-memory tier as one JSON file per
//! namespace in a small, quota-limited directory. This store reads and writes
//! that layout. It is the source for [`migrate_legacy_snapshot`], and it also
//! works as a lightweight sink for a [`FastCache`](super::FastCache) when no
//! durable database is wanted.
//!
//! [`migrate_legacy_snapshot`]: super::migrate_legacy_snapshot

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glossa_core::{CacheResult, DurableOp, SnapshotError, StorageError};

use super::traits::SnapshotStore;

/// One `<namespace>.json` file per namespace under a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl FileSnapshotStore {
    /// Store under `dir`, refusing blobs of `max_bytes` or more.
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> CacheResult<PathBuf> {
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !namespace.starts_with('.');
        if !valid {
            return Err(StorageError::failed(
                DurableOp::Snapshot,
                format!("invalid snapshot namespace {namespace:?}"),
            )
            .into());
        }
        Ok(self.dir.join(format!("{namespace}.json")))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load_snapshot(&self, namespace: &str) -> CacheResult<Option<Vec<u8>>> {
        let path = self.path_for(namespace)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::failed(DurableOp::Snapshot, e).into()),
        }
    }

    async fn store_snapshot(&self, namespace: &str, blob: Vec<u8>) -> CacheResult<()> {
        if blob.len() >= self.max_bytes {
            return Err(SnapshotError::Overflow {
                size: blob.len(),
                limit: self.max_bytes,
            }
            .into());
        }
        let path = self.path_for(namespace)?;
        let staging = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::failed(DurableOp::Snapshot, e))?;
        tokio::fs::write(&staging, &blob)
            .await
            .map_err(|e| StorageError::failed(DurableOp::Snapshot, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| StorageError::failed(DurableOp::Snapshot, e))?;
        Ok(())
    }

    async fn remove_snapshot(&self, namespace: &str) -> CacheResult<()> {
        let path = self.path_for(namespace)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::failed(DurableOp::Snapshot, e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_core::CacheError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_load_remove() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let store = FileSnapshotStore::new(dir.path().join("nested"), 64);

        assert!(store.load_snapshot("translations").await.unwrap().is_none());
        store
            .store_snapshot("translations", b"{\"a\":1}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.load_snapshot("translations").await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );

        store.remove_snapshot("translations").await.unwrap();
        store.remove_snapshot("translations").await.unwrap();
        assert!(store.load_snapshot("translations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_refuses_oversized_blob() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let store = FileSnapshotStore::new(dir.path(), 8);

        let err = store
            .store_snapshot("translations", vec![b'x'; 8])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::Snapshot(SnapshotError::Overflow { size: 8, limit: 8 })
        );
        assert!(store.load_snapshot("translations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_namespace() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let store = FileSnapshotStore::new(dir.path(), 1024);

        for namespace in ["", "../escape", "a/b", ".hidden"] {
            assert!(store.load_snapshot(namespace).await.is_err(), "{namespace}");
        }
    }
}
