//! Glossa Test Utilities
//!
//! Shared test infrastructure for the glossa workspace:
//! - Proptest generators for keys, payloads, records and snapshots
//! - Fixtures for a deterministic clock, payloads and stores
//! - Assertions for cache-specific results

pub use glossa_core::{
    decode_snapshot, encode_snapshot, fingerprint, retain_live, CacheConfig, CacheError,
    CacheRecord, CacheResult, Clock, ManualClock, Snapshot, SnapshotError, StorageError,
    Timestamp,
};
pub use glossa_storage::{CacheFacade, FastCache, FlushOutcome, InMemoryDurableStore};

use serde::{Deserialize, Serialize};

/// Payload shaped like a real cached translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedLines {
    pub source_lang: String,
    pub target_lang: String,
    pub lines: Vec<String>,
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache types.

    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Generate a Timestamp between 2020 and 2030, millisecond precision.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000i64..1_893_456_000_000i64).prop_map(|ms| {
            chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a translation mode.
    pub fn arb_mode() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("en".to_string()),
            Just("romaji".to_string()),
            Just("pinyin".to_string()),
            "[a-z]{2}(-[A-Z]{2})?",
        ]
    }

    /// Generate a cache key the way callers build them.
    pub fn arb_key() -> impl Strategy<Value = String> {
        ("spotify:track:[A-Za-z0-9]{8}", arb_mode())
            .prop_map(|(source, mode)| fingerprint(&source, &mode))
    }

    /// Generate a translated-lines payload.
    pub fn arb_payload() -> impl Strategy<Value = TranslatedLines> {
        (
            arb_mode(),
            arb_mode(),
            prop::collection::vec("[\\p{L} ]{0,24}", 0..8),
        )
            .prop_map(|(source_lang, target_lang, lines)| TranslatedLines {
                source_lang,
                target_lang,
                lines,
            })
    }

    /// Generate a record written at `now - age` with the given lifetime.
    pub fn arb_record_around(now: Timestamp) -> impl Strategy<Value = CacheRecord<TranslatedLines>> {
        (arb_payload(), 0u64..20_000, 1u64..20_000).prop_map(move |(data, age, ttl)| {
            let written = now - chrono::TimeDelta::seconds(age as i64);
            CacheRecord::new(data, written, Duration::from_secs(ttl))
        })
    }

    /// Generate a snapshot mixing live and expired records relative to `now`.
    pub fn arb_snapshot(now: Timestamp) -> impl Strategy<Value = Snapshot<TranslatedLines>> {
        prop::collection::btree_map(arb_key(), arb_record_around(now), 0..24)
    }

    /// Generate a valid in-memory tier configuration.
    pub fn arb_valid_config() -> impl Strategy<Value = CacheConfig> {
        (1usize..64, 1u64..1_000_000, 0.05f64..=1.0, 0.05f64..=1.0).prop_map(
            |(max_size, ttl, ratio, overflow)| {
                CacheConfig::new()
                    .with_max_size(max_size)
                    .with_ttl(Duration::from_secs(ttl))
                    .with_eviction_ratio(ratio)
                    .with_overflow_eviction_ratio(overflow)
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    /// A fixed instant every fixture clock starts at.
    pub fn fixed_start() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2025, 1, 15, 12, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// A manual clock at [`fixed_start`].
    pub fn manual_clock() -> ManualClock {
        ManualClock::new(fixed_start())
    }

    /// A payload with `count` numbered lines.
    pub fn translated_lines(count: usize) -> TranslatedLines {
        TranslatedLines {
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            lines: (1..=count).map(|i| format!("line {i}")).collect(),
        }
    }

    /// A small configuration convenient for eviction tests.
    pub fn small_config(max_size: usize) -> CacheConfig {
        CacheConfig::new().with_max_size(max_size)
    }

    /// A memory-only fast cache driven by `clock`.
    pub fn memory_cache(config: CacheConfig, clock: &ManualClock) -> FastCache<TranslatedLines> {
        FastCache::new(config, Arc::new(clock.clone()))
    }

    /// An in-memory durable store driven by `clock`.
    pub fn memory_store(clock: &ManualClock) -> Arc<InMemoryDurableStore> {
        Arc::new(InMemoryDurableStore::new(Arc::new(clock.clone())))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for cache-specific results.

    use super::*;

    /// Assert that a CacheResult is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a snapshot overflow.
    #[track_caller]
    pub fn assert_snapshot_overflow<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Snapshot(SnapshotError::Overflow { size, limit })) => {
                assert!(size >= limit, "overflow reported {size} < {limit}");
            }
            other => panic!("Expected snapshot overflow, got: {:?}", other),
        }
    }

    /// Assert the exact set of live keys in a fast cache.
    #[track_caller]
    pub fn assert_live_keys<T: glossa_storage::CachePayload>(cache: &FastCache<T>, expected: &[&str]) {
        let mut actual: Vec<String> = cache.live_snapshot().into_keys().collect();
        actual.sort();
        let mut expected: Vec<String> = expected.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(actual, expected);
    }
}

// ============================================================================
// TESTS
// ============================================================================
