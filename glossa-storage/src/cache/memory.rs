//! In-memory durable store.
//!
//! Implements [`DurableStore`] over plain maps. It is used when no disk is
//! wanted and as the reference backend in tests, with switches to inject
//! write and open failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use glossa_core::record::expiry_after;
use glossa_core::{CacheRecord, CacheResult, Clock, DurableOp, Snapshot, StorageError, Timestamp};
use tokio::sync::OnceCell;

use super::traits::{CachePayload, DurableStore, SnapshotStore};

#[derive(Debug, Clone)]
struct StoredRow {
    data: serde_json::Value,
    expiry: Timestamp,
    last_accessed: Timestamp,
}

/// Map-backed [`DurableStore`].
#[derive(Debug)]
pub struct InMemoryDurableStore {
    clock: Arc<dyn Clock>,
    opened: OnceCell<()>,
    open_count: AtomicU64,
    records: RwLock<HashMap<String, StoredRow>>,
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
    markers: RwLock<HashMap<String, String>>,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    snapshot_writes: AtomicU64,
}

impl InMemoryDurableStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            opened: OnceCell::new(),
            open_count: AtomicU64::new(0),
            records: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            markers: RwLock::new(HashMap::new()),
            fail_open: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            snapshot_writes: AtomicU64::new(0),
        }
    }

    /// Make every subsequent `open` fail as if the backend were missing.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many times the connection setup actually ran.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// How many snapshot blobs have been written.
    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, operation: DurableOp) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::failed(operation, "injected write failure").into());
        }
        Ok(())
    }

    fn read<S>(lock: &RwLock<S>) -> CacheResult<RwLockReadGuard<'_, S>> {
        lock.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write<S>(lock: &RwLock<S>) -> CacheResult<RwLockWriteGuard<'_, S>> {
        lock.write().map_err(|_| StorageError::LockPoisoned.into())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryDurableStore {
    async fn load_snapshot(&self, namespace: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(Self::read(&self.snapshots)?.get(namespace).cloned())
    }

    async fn store_snapshot(&self, namespace: &str, blob: Vec<u8>) -> CacheResult<()> {
        self.check_write(DurableOp::Snapshot)?;
        Self::write(&self.snapshots)?.insert(namespace.to_string(), blob);
        self.snapshot_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_snapshot(&self, namespace: &str) -> CacheResult<()> {
        self.check_write(DurableOp::Snapshot)?;
        Self::write(&self.snapshots)?.remove(namespace);
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn open(&self) -> CacheResult<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "injected open failure".to_string(),
            }
            .into());
        }
        self.opened
            .get_or_init(|| async {
                self.open_count.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        Ok(())
    }

    async fn get<T: CachePayload>(&self, key: &str) -> CacheResult<Option<CacheRecord<T>>> {
        let now = self.clock.now();
        let row = match Self::read(&self.records)?.get(key) {
            Some(row) if row.expiry > now => row.clone(),
            _ => return Ok(None),
        };
        let data = serde_json::from_value(row.data)
            .map_err(|e| StorageError::failed(DurableOp::Get, e))?;
        Ok(Some(CacheRecord {
            data,
            expiry: row.expiry,
            last_accessed: row.last_accessed,
        }))
    }

    async fn set<T: CachePayload>(&self, key: &str, data: &T, ttl: Duration) -> CacheResult<()> {
        self.check_write(DurableOp::Set)?;
        let now = self.clock.now();
        let data = serde_json::to_value(data).map_err(|e| StorageError::failed(DurableOp::Set, e))?;
        Self::write(&self.records)?.insert(
            key.to_string(),
            StoredRow {
                data,
                expiry: expiry_after(now, ttl),
                last_accessed: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check_write(DurableOp::Delete)?;
        Ok(Self::write(&self.records)?.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        if pattern.is_empty() {
            return Ok(0);
        }
        self.check_write(DurableOp::Delete)?;
        let mut records = Self::write(&self.records)?;
        let before = records.len();
        records.retain(|key, _| !key.contains(pattern));
        Ok((before - records.len()) as u64)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.check_write(DurableOp::Clear)?;
        Self::write(&self.records)?.clear();
        Ok(())
    }

    async fn bulk_import<T: CachePayload>(&self, records: &Snapshot<T>) -> CacheResult<u64> {
        self.check_write(DurableOp::Import)?;
        let now = self.clock.now();
        let mut rows = Vec::with_capacity(records.len());
        for (key, record) in records.iter().filter(|(_, r)| !r.is_expired_at(now)) {
            let data = serde_json::to_value(&record.data)
                .map_err(|e| StorageError::failed(DurableOp::Import, e))?;
            rows.push((
                key.clone(),
                StoredRow {
                    data,
                    expiry: record.expiry,
                    last_accessed: record.last_accessed,
                },
            ));
        }
        let imported = rows.len() as u64;
        Self::write(&self.records)?.extend(rows);
        Ok(imported)
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        self.check_write(DurableOp::Purge)?;
        let now = self.clock.now();
        let mut records = Self::write(&self.records)?;
        let before = records.len();
        records.retain(|_, row| row.expiry > now);
        Ok((before - records.len()) as u64)
    }

    async fn len(&self) -> CacheResult<u64> {
        Ok(Self::read(&self.records)?.len() as u64)
    }

    async fn read_marker(&self, name: &str) -> CacheResult<Option<String>> {
        Ok(Self::read(&self.markers)?.get(name).cloned())
    }

    async fn write_marker(&self, name: &str, value: &str) -> CacheResult<()> {
        self.check_write(DurableOp::Marker)?;
        Self::write(&self.markers)?.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
