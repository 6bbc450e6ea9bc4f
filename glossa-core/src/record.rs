//! Cache record type shared by the in-memory and durable tiers.

use crate::Timestamp;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One cached artifact plus its lifetime bookkeeping.
///
/// The key is not part of the record: both tiers store records in a map keyed
/// by fingerprint, and the persisted snapshot uses the same shape.
///
/// `expiry` is fixed when the record is written. Reads only move
/// `last_accessed`, which orders LRU eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord<T> {
    /// Opaque payload produced by the caller.
    pub data: T,
    /// Absolute expiry (write time + TTL).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiry: Timestamp,
    /// Last successful read or write.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_accessed: Timestamp,
}

impl<T> CacheRecord<T> {
    /// Create a record written at `now` that lives for `ttl`.
    pub fn new(data: T, now: Timestamp, ttl: Duration) -> Self {
        Self {
            data,
            expiry: expiry_after(now, ttl),
            last_accessed: now,
        }
    }

    /// Whether the record is logically absent at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiry <= now
    }

    /// Mark the record as read at `now`. Does not extend the expiry.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_accessed = now;
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now: Timestamp) -> Duration {
        self.expiry
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Transform the payload, keeping the lifetime bookkeeping.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRecord<U> {
        CacheRecord {
            data: f(self.data),
            expiry: self.expiry,
            last_accessed: self.last_accessed,
        }
    }
}

/// `now + ttl`, saturating at the latest representable instant.
pub fn expiry_after(now: Timestamp, ttl: Duration) -> Timestamp {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// TESTS
// =============================================================================
