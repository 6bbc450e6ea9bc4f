//! Hit/miss and write-back counters for the in-memory tier.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed to an external metrics collector.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads served from memory
    pub hits: AtomicU64,

    /// Reads that found nothing live in memory
    pub misses: AtomicU64,

    /// Memory misses answered by the durable tier
    pub durable_hits: AtomicU64,

    /// Records evicted for capacity or snapshot size
    pub evictions: AtomicU64,

    /// Snapshots written to the durable tier
    pub flushes: AtomicU64,

    /// Flushes that were skipped or failed
    pub flush_failures: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one read, hit or miss.
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_flush(&self, written: bool) {
        if written {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flush_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub durable_hits: u64,
    pub evictions: u64,
    pub flushes: u64,
    pub flush_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_lookup(true);
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_durable_hit();
        metrics.record_evictions(0);
        metrics.record_evictions(3);
        metrics.record_flush(true);
        metrics.record_flush(false);

        assert_eq!(
            metrics.snapshot(),
            CacheMetricsSnapshot {
                hits: 2,
                misses: 1,
                durable_hits: 1,
                evictions: 3,
                flushes: 1,
                flush_failures: 1,
            }
        );
    }
}
