//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable tier: a
//! memory-mapped key-value store that survives restarts and is not bounded by
//! the in-memory tier's capacity.
//!
//! # Layout
//!
//! One environment with three named databases:
//! - `records`: fingerprint → JSON `{ key, data, expiry, lastAccessed }`
//! - `snapshots`: namespace → persisted in-memory snapshot blob
//! - `meta`: marker name → value (schema version, migration markers)
//!
//! # Connection
//!
//! Nothing touches the disk until the first operation. The environment is
//! opened exactly once; concurrent first callers all await the same setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::serde::ts_milliseconds;
use glossa_core::record::expiry_after;
use glossa_core::{
    CacheError, CacheRecord, CacheResult, Clock, DurableConfig, DurableOp, Snapshot, StorageError,
    Timestamp,
};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::traits::{CachePayload, DurableStore, SnapshotStore};

const RECORDS_DB: &str = "records";
const SNAPSHOTS_DB: &str = "snapshots";
const META_DB: &str = "meta";

/// Meta key holding the on-disk layout version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";
/// Layout version written by this build.
pub const SCHEMA_VERSION: &str = "1";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Row encoding error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Row decoding error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmdbStoreError {
    fn into_storage(self, operation: DurableOp) -> StorageError {
        match self {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) | LmdbStoreError::Io(_) => {
                StorageError::Unavailable {
                    reason: self.to_string(),
                }
            }
            other => StorageError::failed(operation, other),
        }
    }
}

fn txn(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Row layout in the `records` database.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DurableRow<T> {
    key: String,
    data: T,
    #[serde(with = "ts_milliseconds")]
    expiry: Timestamp,
    #[serde(with = "ts_milliseconds")]
    last_accessed: Timestamp,
}

/// Just enough of a row to decide whether it has expired.
#[derive(Deserialize)]
struct RowExpiry {
    #[serde(with = "ts_milliseconds")]
    expiry: Timestamp,
}

/// Opened environment and its databases.
struct LmdbHandle {
    env: Env,
    records: Database<Str, Bytes>,
    snapshots: Database<Str, Bytes>,
    meta: Database<Str, Str>,
}

impl LmdbHandle {
    fn open(path: &Path, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn)?;
        let records: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let snapshots: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(SNAPSHOTS_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let meta: Database<Str, Str> = env
            .create_database(&mut wtxn, Some(META_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        let existing = meta
            .get(&wtxn, SCHEMA_VERSION_KEY)
            .map_err(txn)?
            .map(str::to_owned);
        match existing {
            None => meta
                .put(&mut wtxn, SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                .map_err(txn)?,
            Some(version) if version != SCHEMA_VERSION => {
                tracing::warn!(
                    found = %version,
                    expected = SCHEMA_VERSION,
                    "Durable store schema version mismatch"
                );
            }
            Some(_) => {}
        }
        wtxn.commit().map_err(txn)?;

        Ok(Self {
            env,
            records,
            snapshots,
            meta,
        })
    }

    fn get_row<T: CachePayload>(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<Option<CacheRecord<T>>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn)?;
        let Some(bytes) = self.records.get(&rtxn, key).map_err(txn)? else {
            return Ok(None);
        };
        let row: DurableRow<T> = serde_json::from_slice(bytes)
            .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
        if row.expiry <= now {
            return Ok(None);
        }
        Ok(Some(CacheRecord {
            data: row.data,
            expiry: row.expiry,
            last_accessed: row.last_accessed,
        }))
    }

    fn put_rows<'a, T, I>(&self, rows: I) -> Result<u64, LmdbStoreError>
    where
        T: CachePayload,
        I: IntoIterator<Item = (&'a str, &'a T, Timestamp, Timestamp)>,
    {
        let mut wtxn = self.env.write_txn().map_err(txn)?;
        let mut written = 0u64;
        for (key, data, expiry, last_accessed) in rows {
            let row = DurableRow {
                key: key.to_string(),
                data,
                expiry,
                last_accessed,
            };
            let bytes = serde_json::to_vec(&row)
                .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
            self.records.put(&mut wtxn, key, &bytes).map_err(txn)?;
            written += 1;
        }
        wtxn.commit().map_err(txn)?;
        Ok(written)
    }

    /// Collect every record key for which `matches(key, value)` holds.
    fn collect_keys<F>(&self, mut matches: F) -> Result<Vec<String>, LmdbStoreError>
    where
        F: FnMut(&str, &[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn)?;
        let mut keys = Vec::new();
        for result in self.records.iter(&rtxn).map_err(txn)? {
            let (key, value) = result.map_err(txn)?;
            if matches(key, value) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[String]) -> Result<u64, LmdbStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(txn)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.records.delete(&mut wtxn, key).map_err(txn)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn)?;
        Ok(deleted)
    }
}

/// LMDB-backed [`DurableStore`].
///
/// # Example
///
/// ```ignore
/// let store = LmdbDurableStore::new(DurableConfig::from_env(), Arc::new(SystemClock));
/// store.open().await?;
/// let record = store.get::<TranslatedLines>(&key).await?;
/// ```
pub struct LmdbDurableStore {
    path: PathBuf,
    map_size_mb: usize,
    clock: Arc<dyn Clock>,
    handle: OnceCell<LmdbHandle>,
}

impl LmdbDurableStore {
    /// Create a store for `config.path`. Does no I/O.
    pub fn new(config: DurableConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: config.path,
            map_size_mb: config.map_size_mb,
            clock,
            handle: OnceCell::new(),
        }
    }

    /// Directory holding the LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the environment has been opened.
    pub fn is_open(&self) -> bool {
        self.handle.initialized()
    }

    async fn handle(&self) -> CacheResult<&LmdbHandle> {
        self.handle
            .get_or_try_init(|| async {
                if self.map_size_mb == 0 {
                    return Err(CacheError::from(StorageError::Unavailable {
                        reason: "map size must be at least 1 MB".to_string(),
                    }));
                }
                match LmdbHandle::open(&self.path, self.map_size_mb) {
                    Ok(handle) => {
                        tracing::info!(
                            path = %self.path.display(),
                            map_size_mb = self.map_size_mb,
                            "Durable store opened"
                        );
                        Ok(handle)
                    }
                    Err(e) => Err(CacheError::from(e.into_storage(DurableOp::Open))),
                }
            })
            .await
    }
}

#[async_trait]
impl SnapshotStore for LmdbDurableStore {
    async fn load_snapshot(&self, namespace: &str) -> CacheResult<Option<Vec<u8>>> {
        let handle = self.handle().await?;
        let load = || -> Result<Option<Vec<u8>>, LmdbStoreError> {
            let rtxn = handle.env.read_txn().map_err(txn)?;
            Ok(handle
                .snapshots
                .get(&rtxn, namespace)
                .map_err(txn)?
                .map(<[u8]>::to_vec))
        };
        Ok(load().map_err(|e| e.into_storage(DurableOp::Snapshot))?)
    }

    async fn store_snapshot(&self, namespace: &str, blob: Vec<u8>) -> CacheResult<()> {
        let handle = self.handle().await?;
        let store = || -> Result<(), LmdbStoreError> {
            let mut wtxn = handle.env.write_txn().map_err(txn)?;
            handle.snapshots.put(&mut wtxn, namespace, &blob).map_err(txn)?;
            wtxn.commit().map_err(txn)
        };
        Ok(store().map_err(|e| e.into_storage(DurableOp::Snapshot))?)
    }

    async fn remove_snapshot(&self, namespace: &str) -> CacheResult<()> {
        let handle = self.handle().await?;
        let remove = || -> Result<(), LmdbStoreError> {
            let mut wtxn = handle.env.write_txn().map_err(txn)?;
            handle.snapshots.delete(&mut wtxn, namespace).map_err(txn)?;
            wtxn.commit().map_err(txn)
        };
        Ok(remove().map_err(|e| e.into_storage(DurableOp::Snapshot))?)
    }
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn open(&self) -> CacheResult<()> {
        self.handle().await.map(|_| ())
    }

    async fn get<T: CachePayload>(&self, key: &str) -> CacheResult<Option<CacheRecord<T>>> {
        let handle = self.handle().await?;
        let now = self.clock.now();
        Ok(handle
            .get_row(key, now)
            .map_err(|e| e.into_storage(DurableOp::Get))?)
    }

    async fn set<T: CachePayload>(&self, key: &str, data: &T, ttl: Duration) -> CacheResult<()> {
        let handle = self.handle().await?;
        let now = self.clock.now();
        handle
            .put_rows([(key, data, expiry_after(now, ttl), now)])
            .map_err(|e| e.into_storage(DurableOp::Set))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let handle = self.handle().await?;
        let deleted = handle
            .delete_keys(&[key.to_string()])
            .map_err(|e| e.into_storage(DurableOp::Delete))?;
        Ok(deleted > 0)
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        if pattern.is_empty() {
            return Ok(0);
        }
        let handle = self.handle().await?;
        let deleted = handle
            .collect_keys(|key, _| key.contains(pattern))
            .and_then(|keys| handle.delete_keys(&keys))
            .map_err(|e| e.into_storage(DurableOp::Delete))?;
        tracing::debug!(pattern, deleted, "Deleted durable records by key pattern");
        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<()> {
        let handle = self.handle().await?;
        let clear = || -> Result<(), LmdbStoreError> {
            let mut wtxn = handle.env.write_txn().map_err(txn)?;
            handle.records.clear(&mut wtxn).map_err(txn)?;
            wtxn.commit().map_err(txn)
        };
        Ok(clear().map_err(|e| e.into_storage(DurableOp::Clear))?)
    }

    async fn bulk_import<T: CachePayload>(&self, records: &Snapshot<T>) -> CacheResult<u64> {
        let handle = self.handle().await?;
        let now = self.clock.now();
        let live = records
            .iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .map(|(key, record)| {
                (
                    key.as_str(),
                    &record.data,
                    record.expiry,
                    record.last_accessed,
                )
            });
        Ok(handle
            .put_rows(live)
            .map_err(|e| e.into_storage(DurableOp::Import))?)
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        let handle = self.handle().await?;
        let now = self.clock.now();
        let purged = handle
            .collect_keys(|key, value| match serde_json::from_slice::<RowExpiry>(value) {
                Ok(row) => row.expiry <= now,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Purging undecodable durable record");
                    true
                }
            })
            .and_then(|keys| handle.delete_keys(&keys))
            .map_err(|e| e.into_storage(DurableOp::Purge))?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired durable records");
        }
        Ok(purged)
    }

    async fn len(&self) -> CacheResult<u64> {
        let handle = self.handle().await?;
        let len = || -> Result<u64, LmdbStoreError> {
            let rtxn = handle.env.read_txn().map_err(txn)?;
            handle.records.len(&rtxn).map_err(txn)
        };
        Ok(len().map_err(|e| e.into_storage(DurableOp::Get))?)
    }

    async fn read_marker(&self, name: &str) -> CacheResult<Option<String>> {
        let handle = self.handle().await?;
        let read = || -> Result<Option<String>, LmdbStoreError> {
            let rtxn = handle.env.read_txn().map_err(txn)?;
            Ok(handle.meta.get(&rtxn, name).map_err(txn)?.map(str::to_owned))
        };
        Ok(read().map_err(|e| e.into_storage(DurableOp::Marker))?)
    }

    async fn write_marker(&self, name: &str, value: &str) -> CacheResult<()> {
        let handle = self.handle().await?;
        let write = || -> Result<(), LmdbStoreError> {
            let mut wtxn = handle.env.write_txn().map_err(txn)?;
            handle.meta.put(&mut wtxn, name, value).map_err(txn)?;
            wtxn.commit().map_err(txn)
        };
        Ok(write().map_err(|e| e.into_storage(DurableOp::Marker))?)
    }
}
