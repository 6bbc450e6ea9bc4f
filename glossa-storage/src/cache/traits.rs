//! Store traits, payload marker and cache statistics.
//!
//! This module defines the traits that durable backends implement and the
//! bound every cached payload must satisfy.

use async_trait::async_trait;
use glossa_core::{CacheRecord, CacheResult, Snapshot};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Marker trait for payloads that can be cached.
///
/// The cache never looks inside a payload. It clones it out of the in-memory
/// tier and serializes it for the durable tier, nothing more.
pub trait CachePayload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachePayload for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Namespaced blob storage for the in-memory tier's persisted snapshot.
///
/// Each namespace holds one blob. Writes replace the blob wholesale.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the blob stored under `namespace`, if any.
    async fn load_snapshot(&self, namespace: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Replace the blob stored under `namespace`.
    async fn store_snapshot(&self, namespace: &str, blob: Vec<u8>) -> CacheResult<()>;

    /// Remove the blob stored under `namespace`. Missing blobs are not an error.
    async fn remove_snapshot(&self, namespace: &str) -> CacheResult<()>;
}

/// Durable key-value tier with per-record expiry.
///
/// Larger and slower than the in-memory tier and not bounded by its capacity.
/// Expired rows read as absent whether or not they have been purged.
///
/// Every operation returns a `CacheResult`; callers on the hot path treat an
/// error as a miss (reads) or as "accepted in memory only" (writes).
#[async_trait]
pub trait DurableStore: SnapshotStore {
    /// Establish the underlying connection.
    ///
    /// Idempotent. Concurrent callers before the connection is ready all wait
    /// on the same setup.
    async fn open(&self) -> CacheResult<()>;

    /// Get a live record.
    async fn get<T: CachePayload>(&self, key: &str) -> CacheResult<Option<CacheRecord<T>>>;

    /// Upsert a record expiring `ttl` from now.
    async fn set<T: CachePayload>(&self, key: &str, data: &T, ttl: Duration) -> CacheResult<()>;

    /// Delete one record. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every record whose key contains `pattern`.
    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64>;

    /// Delete every record.
    async fn clear(&self) -> CacheResult<()>;

    /// Upsert every record of `records` that is still live; returns how many
    /// were written. Re-importing the same records overwrites them.
    async fn bulk_import<T: CachePayload>(&self, records: &Snapshot<T>) -> CacheResult<u64>;

    /// Physically remove expired records.
    async fn purge_expired(&self) -> CacheResult<u64>;

    /// Number of stored records, expired or not.
    async fn len(&self) -> CacheResult<u64>;

    /// Read a metadata marker.
    async fn read_marker(&self, name: &str) -> CacheResult<Option<String>>;

    /// Write a metadata marker.
    async fn write_marker(&self, name: &str, value: &str) -> CacheResult<()>;
}

/// Statistics about the in-memory tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of records currently held.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Record lifetime in days.
    pub ttl_in_days: f64,
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that missed memory, including those the durable tier answered.
    pub misses: u64,
    /// Memory misses answered by the durable tier.
    pub durable_hits: u64,
    /// Number of records evicted for capacity or snapshot size.
    pub evictions: u64,
    /// Number of snapshots written.
    pub flushes: u64,
}

impl CacheStats {
    /// Share of lookups answered by either tier (0.0 to 1.0).
    pub fn overall_hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.durable_hits) as f64 / total as f64
        }
    }

    /// Calculate the in-memory hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let stats = CacheStats {
            hits: 60,
            misses: 40,
            durable_hits: 30,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.6).abs() < 0.001);
        assert!((stats.overall_hit_rate() - 0.9).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
