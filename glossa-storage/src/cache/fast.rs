//! Bounded in-memory tier.
//!
//! The primary read/write path. Holds at most `max_size` records, expires them
//! lazily on read, evicts the coldest fraction by `last_accessed` when full,
//! and mirrors itself to a [`SnapshotStore`] through a debounced flush.
//!
//! # Locking
//!
//! Public operations are synchronous. The record map sits behind a mutex that
//! is never held across an `.await`: a flush copies the live records first
//! and only then writes, so a concurrent `set` cannot corrupt the blob.
//!
//! Snapshot writes and removals are serialized by an async write gate held
//! across the sink call. `clear_all` takes the gate, so a write that started
//! before it finishes before the snapshot is removed and cannot resurrect it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use glossa_core::{
    decode_snapshot, encode_snapshot, retain_live, CacheConfig, CacheRecord, Clock, Snapshot,
    SnapshotError, Timestamp,
};
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::metrics::CacheMetrics;
use super::traits::{CachePayload, CacheStats, SnapshotStore};

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The snapshot was written.
    Written { records: usize, bytes: usize },
    /// The snapshot hit the size guard; the coldest records were evicted
    /// instead and nothing was written.
    Oversized { size: usize, evicted: usize },
    /// Serialization or the durable write failed; memory is unchanged.
    Failed,
    /// No snapshot store is attached.
    Skipped,
}

struct Slot<T> {
    record: CacheRecord<T>,
    /// Access order tiebreak for records sharing a timestamp.
    tick: u64,
}

struct State<T> {
    entries: HashMap<String, Slot<T>>,
    tick: u64,
}

impl<T> State<T> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Remove the `count` least recently accessed records.
    fn evict_coldest(&mut self, count: usize) -> usize {
        if count == 0 || self.entries.is_empty() {
            return 0;
        }
        let mut order: Vec<(Timestamp, u64, &String)> = self
            .entries
            .iter()
            .map(|(key, slot)| (slot.record.last_accessed, slot.tick, key))
            .collect();
        order.sort_unstable();
        let victims: Vec<String> = order
            .into_iter()
            .take(count)
            .map(|(_, _, key)| key.clone())
            .collect();
        for key in &victims {
            self.entries.remove(key);
        }
        victims.len()
    }
}

#[derive(Default)]
struct PendingFlush {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Shared<T> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn SnapshotStore>>,
    runtime: Option<Handle>,
    state: Mutex<State<T>>,
    pending: Mutex<PendingFlush>,
    /// Held across every snapshot write and removal.
    write_gate: AsyncMutex<()>,
    metrics: CacheMetrics,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let pending = match self.pending.get_mut() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
    }
}

/// Bounded LRU + TTL map with debounced write-back.
///
/// Cloning is cheap and clones share state.
///
/// # Example
///
/// ```ignore
/// let cache = FastCache::with_sink(CacheConfig::default(), clock, store);
/// cache.set(fingerprint(uri, "en"), lines);
/// let hit = cache.get(&fingerprint(uri, "en"));
/// ```
pub struct FastCache<T: CachePayload> {
    inner: Arc<Shared<T>>,
}

impl<T: CachePayload> FastCache<T> {
    /// Memory-only cache with no write-back.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock, None)
    }

    /// Cache that mirrors itself into `sink`.
    ///
    /// Flushes are spawned on the tokio runtime current at construction. With
    /// no runtime the cache still works but never writes back.
    pub fn with_sink(config: CacheConfig, clock: Arc<dyn Clock>, sink: Arc<dyn SnapshotStore>) -> Self {
        Self::build(config, clock, Some(sink))
    }

    fn build(
        mut config: CacheConfig,
        clock: Arc<dyn Clock>,
        sink: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        if config.max_size == 0 {
            tracing::warn!("Cache max_size of 0 raised to 1");
            config.max_size = 1;
        }
        let runtime = Handle::try_current().ok();
        if sink.is_some() && runtime.is_none() {
            tracing::warn!("No tokio runtime available, write-back disabled");
        }
        Self {
            inner: Arc::new(Shared {
                config,
                clock,
                sink,
                runtime,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    tick: 0,
                }),
                pending: Mutex::new(PendingFlush::default()),
                write_gate: AsyncMutex::new(()),
                metrics: CacheMetrics::new(),
            }),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Hit/miss and write-back counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        lock_or_recover(&self.inner.state, "state")
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Get a live value, marking it as recently used.
    ///
    /// An expired record is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.now();
        let found = {
            let mut state = self.state();
            let expired = state
                .entries
                .get(key)
                .map(|slot| slot.record.is_expired_at(now));
            match expired {
                None => None,
                Some(true) => {
                    state.entries.remove(key);
                    None
                }
                Some(false) => {
                    let tick = state.next_tick();
                    state.entries.get_mut(key).map(|slot| {
                        slot.record.touch(now);
                        slot.tick = tick;
                        slot.record.data.clone()
                    })
                }
            }
        };
        self.inner.metrics.record_lookup(found.is_some());
        found
    }

    /// Whether `key` is physically present. Neither touches nor expires.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Number of records held, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only statistics.
    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        let metrics = self.inner.metrics.snapshot();
        CacheStats {
            size,
            max_size: self.inner.config.max_size,
            ttl_in_days: self.inner.config.ttl_in_days(),
            hits: metrics.hits,
            misses: metrics.misses,
            durable_hits: metrics.durable_hits,
            evictions: metrics.evictions,
            flushes: metrics.flushes,
        }
    }

    /// Copy of every record that is live right now.
    pub fn live_snapshot(&self) -> Snapshot<T> {
        let now = self.now();
        self.state()
            .entries
            .iter()
            .filter(|(_, slot)| !slot.record.is_expired_at(now))
            .map(|(key, slot)| (key.clone(), slot.record.clone()))
            .collect()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert or replace a value and schedule a flush.
    pub fn set(&self, key: impl Into<String>, data: T) {
        self.set_with(key, data, true);
    }

    /// Insert or replace a value. With `persist == false` the write stays in
    /// memory until some later call flushes.
    pub fn set_with(&self, key: impl Into<String>, data: T, persist: bool) {
        let record = CacheRecord::new(data, self.now(), self.inner.config.ttl);
        self.insert_record(key.into(), record, persist);
    }

    /// Insert an existing record, keeping its expiry and access time.
    ///
    /// Returns `false` (and inserts nothing) if the record is already expired.
    pub fn restore(&self, key: impl Into<String>, record: CacheRecord<T>, persist: bool) -> bool {
        if record.is_expired_at(self.now()) {
            return false;
        }
        self.insert_record(key.into(), record, persist);
        true
    }

    fn insert_record(&self, key: String, record: CacheRecord<T>, persist: bool) {
        let evicted = {
            let mut state = self.state();
            self.insert_locked(&mut state, key, record)
        };
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted coldest records to make room");
        }
        if persist {
            self.schedule_flush();
        }
    }

    /// Upsert under the lock, evicting first if a new key would overflow.
    fn insert_locked(&self, state: &mut State<T>, key: String, record: CacheRecord<T>) -> usize {
        let evicted = if state.entries.contains_key(&key) {
            0
        } else {
            self.make_room(state)
        };
        let tick = state.next_tick();
        state.entries.insert(key, Slot { record, tick });
        evicted
    }

    fn make_room(&self, state: &mut State<T>) -> usize {
        let len = state.entries.len();
        let max_size = self.inner.config.max_size;
        if len < max_size {
            return 0;
        }
        // The ratio alone rounds to zero on small caches; always free at
        // least enough for the incoming record.
        let needed = len + 1 - max_size;
        let count = ratio_count(len, self.inner.config.eviction_ratio).max(needed);
        let evicted = state.evict_coldest(count);
        self.inner.metrics.record_evictions(evicted);
        evicted
    }

    /// Evict `floor(len * ratio)` of the least recently accessed records.
    ///
    /// Expiry is not consulted.
    pub fn evict(&self, ratio: f64) -> usize {
        let evicted = {
            let mut state = self.state();
            let count = ratio_count(state.entries.len(), ratio);
            state.evict_coldest(count)
        };
        self.inner.metrics.record_evictions(evicted);
        evicted
    }

    /// Evict the coldest records so that `floor(len * (1 - ratio))` remain.
    fn shrink(&self, ratio: f64) -> usize {
        if ratio.is_nan() {
            return 0;
        }
        let evicted = {
            let mut state = self.state();
            let len = state.entries.len();
            let remain = ratio_count(len, 1.0 - ratio);
            state.evict_coldest(len - remain)
        };
        self.inner.metrics.record_evictions(evicted);
        evicted
    }

    /// Remove one record. Schedules a flush if it existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.state().entries.remove(key).is_some();
        if removed {
            self.schedule_flush();
        }
        removed
    }

    /// Remove every record whose key contains `pattern` and return how many
    /// were removed. An empty pattern removes nothing.
    pub fn clear_by_key_pattern(&self, pattern: &str) -> usize {
        if pattern.is_empty() {
            return 0;
        }
        let removed = {
            let mut state = self.state();
            let before = state.entries.len();
            state.entries.retain(|key, _| !key.contains(pattern));
            before - state.entries.len()
        };
        if removed > 0 {
            tracing::debug!(pattern, removed, "Cleared records by key pattern");
            self.schedule_flush();
        }
        removed
    }

    /// Empty the map and delete the persisted snapshot.
    ///
    /// Waits for a snapshot write already in progress, then removes it.
    pub async fn clear_all(&self) {
        self.cancel_pending_flush();
        self.state().entries.clear();
        if let Some(sink) = &self.inner.sink {
            let _gate = self.inner.write_gate.lock().await;
            let namespace = self.inner.config.snapshot_namespace.as_str();
            if let Err(e) = sink.remove_snapshot(namespace).await {
                tracing::warn!(error = %e, namespace, "Failed to remove persisted snapshot");
            }
        }
    }

    // ========================================================================
    // WRITE-BACK
    // ========================================================================

    /// (Re)start the debounce timer. Only the last call inside one debounce
    /// window results in a flush.
    pub fn schedule_flush(&self) {
        let Some(runtime) = self.inner.runtime.as_ref() else {
            return;
        };
        if self.inner.sink.is_none() {
            return;
        }

        let delay = self.inner.config.flush_debounce;
        let weak: Weak<Shared<T>> = Arc::downgrade(&self.inner);

        let mut pending = lock_or_recover(&self.inner.pending, "pending flush");
        pending.generation += 1;
        let generation = pending.generation;
        if let Some(previous) = pending.handle.take() {
            previous.abort();
        }
        pending.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let cache = FastCache { inner };
            // Past this point a reschedule must not abort the write.
            cache.detach_pending(generation);
            cache.flush().await;
        }));
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Flush scheduled");
    }

    fn detach_pending(&self, generation: u64) {
        let mut pending = lock_or_recover(&self.inner.pending, "pending flush");
        if pending.generation == generation {
            pending.handle = None;
        }
    }

    /// Cancel the pending timer. Returns whether one was pending.
    pub fn cancel_pending_flush(&self) -> bool {
        let mut pending = lock_or_recover(&self.inner.pending, "pending flush");
        pending.generation += 1;
        match pending.handle.take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Pending flush cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a debounce timer is waiting to fire.
    pub fn has_pending_flush(&self) -> bool {
        lock_or_recover(&self.inner.pending, "pending flush")
            .handle
            .is_some()
    }

    /// Write every live record to the snapshot store as one blob.
    ///
    /// If the blob would reach the size limit nothing is written; the coldest
    /// `overflow_eviction_ratio` of the records is evicted instead, leaving
    /// `floor(len * (1 - ratio))`, and the next persisted write will try again.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(sink) = self.inner.sink.clone() else {
            return FlushOutcome::Skipped;
        };
        let config = &self.inner.config;
        let namespace = config.snapshot_namespace.as_str();

        // Taken before the copy so the blob never predates a clear_all.
        let _gate = self.inner.write_gate.lock().await;
        let snapshot = self.live_snapshot();
        let records = snapshot.len();

        let outcome = match encode_snapshot(&snapshot, config.snapshot_limit_bytes) {
            Ok(blob) => {
                drop(snapshot);
                let bytes = blob.len();
                match sink.store_snapshot(namespace, blob).await {
                    Ok(()) => {
                        tracing::debug!(records, bytes, namespace, "Snapshot flushed");
                        FlushOutcome::Written { records, bytes }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            namespace,
                            "Snapshot write failed, records kept in memory only"
                        );
                        FlushOutcome::Failed
                    }
                }
            }
            Err(SnapshotError::Overflow { size, limit }) => {
                let evicted = self.shrink(config.overflow_eviction_ratio);
                tracing::warn!(
                    size,
                    limit,
                    evicted,
                    "Snapshot over size limit, evicted coldest records and skipped flush"
                );
                FlushOutcome::Oversized { size, evicted }
            }
            Err(e) => {
                tracing::warn!(error = %e, namespace, "Snapshot serialization failed");
                FlushOutcome::Failed
            }
        };

        self.inner
            .metrics
            .record_flush(matches!(outcome, FlushOutcome::Written { .. }));
        outcome
    }

    /// Cancel the debounce timer and flush immediately.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.cancel_pending_flush();
        self.flush().await
    }

    /// Rehydrate from the persisted snapshot and return how many records were
    /// loaded. A malformed snapshot is discarded.
    pub async fn load_snapshot(&self) -> usize {
        let Some(sink) = self.inner.sink.clone() else {
            return 0;
        };
        let namespace = self.inner.config.snapshot_namespace.as_str();

        let blob = match sink.load_snapshot(namespace).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!(error = %e, namespace, "Failed to read persisted snapshot");
                return 0;
            }
        };

        let snapshot = match decode_snapshot::<T>(&blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, namespace, "Discarding malformed snapshot");
                return 0;
            }
        };

        let loaded = self.restore_snapshot(snapshot);
        tracing::info!(loaded, namespace, "Snapshot loaded");
        loaded
    }

    /// Insert every live record of `snapshot` without scheduling a flush.
    ///
    /// If there are more live records than capacity, the most recently
    /// accessed ones win.
    pub fn restore_snapshot(&self, snapshot: Snapshot<T>) -> usize {
        let mut live: Vec<(String, CacheRecord<T>)> =
            retain_live(snapshot, self.now()).into_iter().collect();
        live.sort_by(|a, b| b.1.last_accessed.cmp(&a.1.last_accessed));
        live.truncate(self.inner.config.max_size);

        let mut state = self.state();
        let mut loaded = 0;
        // Coldest first so access ticks follow the persisted order.
        for (key, record) in live.into_iter().rev() {
            self.insert_locked(&mut state, key, record);
            loaded += 1;
        }
        loaded
    }
}

impl<T: CachePayload> Clone for FastCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn ratio_count(len: usize, ratio: f64) -> usize {
    if ratio.is_nan() || ratio <= 0.0 {
        return 0;
    }
    ((len as f64) * ratio.min(1.0)).floor() as usize
}

fn lock_or_recover<'a, S>(mutex: &'a Mutex<S>, what: &'static str) -> MutexGuard<'a, S> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!(lock = what, "Recovered poisoned cache lock");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryDurableStore;
    use chrono::{TimeZone, Utc};
    use glossa_core::ManualClock;
    use proptest::prelude::*;
    use std::time::Duration;

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap()
    }

    fn memory_cache(max_size: usize) -> (FastCache<String>, ManualClock) {
        let clock = ManualClock::new(start());
        let config = CacheConfig::new().with_max_size(max_size);
        (FastCache::new(config, Arc::new(clock.clone())), clock)
    }

    fn keys(cache: &FastCache<String>) -> Vec<String> {
        let mut keys: Vec<String> = cache.live_snapshot().into_keys().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let (cache, _clock) = memory_cache(10);
        cache.set("a:en", "hello".to_string());
        assert_eq!(cache.get("a:en").as_deref(), Some("hello"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_record_is_removed_on_read() {
        let (cache, clock) = memory_cache(10);
        cache.set("X", "{v:1}".to_string());

        clock.advance(Duration::from_secs(7 * 24 * 60 * 60 + 1));
        assert!(cache.contains_key("X"));
        assert_eq!(cache.get("X"), None);
        assert!(!cache.contains_key("X"));
    }

    #[test]
    fn test_read_does_not_extend_ttl() {
        let clock = ManualClock::new(start());
        let config = CacheConfig::new().with_ttl(Duration::from_secs(100));
        let cache: FastCache<u32> = FastCache::new(config, Arc::new(clock.clone()));

        cache.set("k", 1);
        clock.advance(Duration::from_secs(90));
        assert_eq!(cache.get("k"), Some(1));
        clock.advance(Duration::from_secs(20));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_touched_record_survives_eviction() {
        let (cache, clock) = memory_cache(3);
        for key in ["A", "B", "C"] {
            cache.set(key, key.to_lowercase());
            clock.advance(Duration::from_secs(1));
        }
        assert!(cache.get("A").is_some());
        clock.advance(Duration::from_secs(1));
        cache.set("D", "d".to_string());

        assert_eq!(keys(&cache), vec!["A", "C", "D"]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_order_with_frozen_clock() {
        let (cache, _clock) = memory_cache(3);
        cache.set("A", "a".to_string());
        cache.set("B", "b".to_string());
        cache.set("C", "c".to_string());
        cache.get("A");
        cache.set("D", "d".to_string());

        assert_eq!(keys(&cache), vec!["A", "C", "D"]);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (cache, _clock) = memory_cache(2);
        cache.set("A", "a".to_string());
        cache.set("B", "b".to_string());
        cache.set("A", "a2".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("A").as_deref(), Some("a2"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_ratio_eviction_at_capacity() {
        let (cache, clock) = memory_cache(10);
        for i in 0..10 {
            cache.set(format!("k{i}"), i.to_string());
            clock.advance(Duration::from_secs(1));
        }
        cache.set("k10", "10".to_string());

        // floor(10 * 0.2) = 2 coldest removed before the insert.
        assert_eq!(cache.len(), 9);
        assert!(!cache.contains_key("k0"));
        assert!(!cache.contains_key("k1"));
        assert!(cache.contains_key("k2"));
        assert!(cache.contains_key("k10"));
    }

    #[test]
    fn test_evict_removes_exactly_the_oldest() {
        let (cache, clock) = memory_cache(100);
        for i in 0..10 {
            cache.set(format!("k{i}"), i.to_string());
            clock.advance(Duration::from_secs(1));
        }
        // Touch k0 so it is the newest.
        cache.get("k0");

        assert_eq!(cache.evict(0.3), 3);
        assert_eq!(cache.len(), 7);
        for gone in ["k1", "k2", "k3"] {
            assert!(!cache.contains_key(gone), "{gone} should be evicted");
        }
        assert!(cache.contains_key("k0"));
        assert_eq!(cache.evict(0.0), 0);
    }

    #[test]
    fn test_clear_by_key_pattern() {
        let (cache, _clock) = memory_cache(10);
        cache.set("track-1:en", "a".to_string());
        cache.set("track-1:romaji", "b".to_string());
        cache.set("track-2:en", "c".to_string());

        assert_eq!(cache.clear_by_key_pattern("track-1"), 2);
        assert_eq!(keys(&cache), vec!["track-2:en"]);
        assert_eq!(cache.clear_by_key_pattern("track-9"), 0);
        assert_eq!(cache.clear_by_key_pattern(""), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let (cache, _clock) = memory_cache(10);
        cache.set("a", "1".to_string());
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let (cache, _clock) = memory_cache(500);
        cache.set("a", "1".to_string());
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 500);
        assert!((stats.ttl_in_days - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_restore_keeps_expiry_and_rejects_expired() {
        let (cache, clock) = memory_cache(10);
        let record = CacheRecord::new("kept".to_string(), start(), Duration::from_secs(60));
        clock.advance(Duration::from_secs(30));

        assert!(cache.restore("a", record.clone(), false));
        assert_eq!(cache.live_snapshot()["a"].expiry, record.expiry);

        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.get("a"), None);
        assert!(!cache.restore("b", record, false));
    }

    #[test]
    fn test_restore_snapshot_prefers_recent_records() {
        let (cache, _clock) = memory_cache(2);
        let mut snapshot = Snapshot::new();
        for (i, key) in ["old", "mid", "new"].iter().enumerate() {
            let mut record = CacheRecord::new(key.to_string(), start(), Duration::from_secs(3600));
            record.touch(start() + chrono::TimeDelta::seconds(i as i64));
            snapshot.insert(key.to_string(), record);
        }
        snapshot.insert(
            "expired".to_string(),
            CacheRecord::new("x".to_string(), start(), Duration::from_millis(0)),
        );

        assert_eq!(cache.restore_snapshot(snapshot), 2);
        assert_eq!(keys(&cache), vec!["mid", "new"]);
    }

    #[test]
    fn test_memory_only_flush_is_skipped() {
        let (cache, _clock) = memory_cache(10);
        cache.set("a", "1".to_string());
        assert!(!cache.has_pending_flush());
        let outcome = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime should build")
            .block_on(cache.flush());
        assert_eq!(outcome, FlushOutcome::Skipped);
    }

    fn synced_cache(config: CacheConfig) -> (FastCache<String>, Arc<InMemoryDurableStore>, ManualClock) {
        let clock = ManualClock::new(start());
        let store = Arc::new(InMemoryDurableStore::new(Arc::new(clock.clone())));
        let cache = FastCache::with_sink(config, Arc::new(clock.clone()), store.clone());
        (cache, store, clock)
    }

    async fn stored_snapshot(store: &InMemoryDurableStore) -> Option<Snapshot<String>> {
        store
            .load_snapshot("translations")
            .await
            .expect("load should succeed")
            .map(|blob| decode_snapshot(&blob).expect("snapshot should decode"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_burst_into_one_flush() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());

        for i in 0..5 {
            cache.set("k", format!("v{i}"));
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert!(cache.has_pending_flush());
        assert_eq!(store.snapshot_writes(), 0);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.snapshot_writes(), 1);
        assert!(!cache.has_pending_flush());

        let snapshot = stored_snapshot(&store).await.expect("snapshot should exist");
        assert_eq!(snapshot["k"].data, "v4");
        assert_eq!(cache.stats().flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_only_writes_are_not_scheduled() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());
        cache.set_with("a", "1".to_string(), false);
        assert!(!cache.has_pending_flush());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.snapshot_writes(), 0);

        // The next persisted write carries it along.
        cache.set("b", "2".to_string());
        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = stored_snapshot(&store).await.expect("snapshot should exist");
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_flush() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());
        cache.set("a", "1".to_string());
        assert!(cache.cancel_pending_flush());
        assert!(!cache.cancel_pending_flush());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.snapshot_writes(), 0);
    }

    #[tokio::test]
    async fn test_flush_writes_only_live_records() {
        let config = CacheConfig::new().with_ttl(Duration::from_secs(60));
        let (cache, store, clock) = synced_cache(config);
        cache.set("old", "1".to_string());
        clock.advance(Duration::from_secs(45));
        cache.set("new", "2".to_string());
        clock.advance(Duration::from_secs(30));

        let outcome = cache.flush_now().await;
        assert!(matches!(outcome, FlushOutcome::Written { records: 1, .. }));

        let snapshot = stored_snapshot(&store).await.expect("snapshot should exist");
        assert!(snapshot.contains_key("new"));
        assert!(!snapshot.contains_key("old"));
    }

    #[tokio::test]
    async fn test_oversized_flush_evicts_half_and_writes_nothing() {
        let config = CacheConfig::new().with_snapshot_limit(1024);
        let (cache, store, clock) = synced_cache(config);
        for i in 0..10 {
            cache.set(format!("k{i}"), "x".repeat(200));
            clock.advance(Duration::from_secs(1));
        }
        cache.cancel_pending_flush();

        let outcome = cache.flush().await;
        assert!(matches!(outcome, FlushOutcome::Oversized { evicted: 5, .. }));
        assert_eq!(cache.stats().size, 5);
        assert!(!cache.contains_key("k0"));
        assert!(cache.contains_key("k9"));
        assert_eq!(store.snapshot_writes(), 0);
        assert_eq!(cache.metrics().snapshot().flush_failures, 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());
        store.set_fail_writes(true);
        cache.set("a", "1".to_string());

        assert_eq!(cache.flush_now().await, FlushOutcome::Failed);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_load_snapshot_round_trip() {
        let (cache, store, clock) = synced_cache(CacheConfig::default());
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.flush_now().await;

        let reloaded = FastCache::<String>::with_sink(
            CacheConfig::default(),
            Arc::new(clock.clone()),
            store.clone(),
        );
        assert_eq!(reloaded.load_snapshot().await, 2);
        assert_eq!(reloaded.get("b").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_discarded() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());
        store
            .store_snapshot("translations", b"{not json".to_vec())
            .await
            .expect("store should succeed");

        assert_eq!(cache.load_snapshot().await, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_removes_snapshot() {
        let (cache, store, _clock) = synced_cache(CacheConfig::default());
        cache.set("a", "1".to_string());
        cache.flush_now().await;
        assert!(stored_snapshot(&store).await.is_some());

        cache.clear_all().await;
        assert!(cache.is_empty());
        assert!(!cache.has_pending_flush());
        assert!(stored_snapshot(&store).await.is_none());
    }

    /// Snapshot store whose writes take a while to land.
    struct SlowSink {
        inner: InMemoryDurableStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SnapshotStore for SlowSink {
        async fn load_snapshot(&self, namespace: &str) -> glossa_core::CacheResult<Option<Vec<u8>>> {
            self.inner.load_snapshot(namespace).await
        }

        async fn store_snapshot(&self, namespace: &str, blob: Vec<u8>) -> glossa_core::CacheResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.store_snapshot(namespace, blob).await
        }

        async fn remove_snapshot(&self, namespace: &str) -> glossa_core::CacheResult<()> {
            self.inner.remove_snapshot(namespace).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_is_not_undone_by_in_flight_write() {
        let clock = ManualClock::new(start());
        let sink = Arc::new(SlowSink {
            inner: InMemoryDurableStore::new(Arc::new(clock.clone())),
            delay: Duration::from_millis(500),
        });
        let cache: FastCache<String> =
            FastCache::with_sink(CacheConfig::default(), Arc::new(clock.clone()), sink.clone());

        cache.set("secret:en", "s".to_string());
        // The debounce fires at 2s; the write is still sleeping at 2.1s.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(!cache.has_pending_flush());

        cache.clear_all().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(stored_snapshot(&sink.inner).await.is_none());
        let reloaded = FastCache::<String>::with_sink(
            CacheConfig::default(),
            Arc::new(clock.clone()),
            sink.clone(),
        );
        assert_eq!(reloaded.load_snapshot().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_flush_rounds_remaining_size_down() {
        let config = CacheConfig::new().with_snapshot_limit(1024);
        let (cache, store, clock) = synced_cache(config);
        for i in 0..11 {
            cache.set(format!("k{i:02}"), "x".repeat(200));
            clock.advance(Duration::from_secs(1));
        }
        cache.cancel_pending_flush();

        let outcome = cache.flush().await;
        assert!(matches!(outcome, FlushOutcome::Oversized { evicted: 6, .. }));
        assert_eq!(cache.stats().size, 5);
        for gone in ["k00", "k05"] {
            assert!(!cache.contains_key(gone), "{gone} should be evicted");
        }
        assert!(cache.contains_key("k06"));
        assert!(cache.contains_key("k10"));
        assert_eq!(store.snapshot_writes(), 0);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let clock = ManualClock::new(start());
        let config = CacheConfig::new().with_max_size(0);
        let cache: FastCache<String> = FastCache::new(config, Arc::new(clock));

        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().max_size, 1);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_size_never_exceeds_capacity(
            max_size in 1usize..20,
            ops in proptest::collection::vec((0u8..40, any::<bool>()), 1..200),
        ) {
            let (cache, clock) = memory_cache(max_size);
            for (key, read) in ops {
                let key = format!("k{key}");
                if read {
                    cache.get(&key);
                } else {
                    cache.set(key, String::new());
                    prop_assert!(cache.len() <= max_size);
                }
                clock.advance(Duration::from_millis(10));
            }
        }
    }
}
