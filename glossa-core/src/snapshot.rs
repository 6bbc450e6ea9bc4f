//! Persisted snapshot codec.
//!
//! A snapshot is the whole in-memory tier written as a single JSON object,
//! key → `{ data, expiry, lastAccessed }`. Writes are full overwrites and are
//! refused at or above a byte limit so one oversized write never reaches the
//! durable tier.

use crate::error::SnapshotError;
use crate::record::CacheRecord;
use crate::Timestamp;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

/// Key → record map in persisted form. Ordered so blobs are deterministic.
pub type Snapshot<T> = BTreeMap<String, CacheRecord<T>>;

/// Serialize a snapshot, enforcing `limit` (exclusive) on the encoded size.
pub fn encode_snapshot<T: Serialize>(
    snapshot: &Snapshot<T>,
    limit: usize,
) -> Result<Vec<u8>, SnapshotError> {
    let bytes = serde_json::to_vec(snapshot).map_err(|e| SnapshotError::Serialization {
        reason: e.to_string(),
    })?;
    if bytes.len() >= limit {
        return Err(SnapshotError::Overflow {
            size: bytes.len(),
            limit,
        });
    }
    Ok(bytes)
}

/// Parse a persisted snapshot blob.
pub fn decode_snapshot<T: DeserializeOwned>(bytes: &[u8]) -> Result<Snapshot<T>, SnapshotError> {
    serde_json::from_slice(bytes).map_err(|e| SnapshotError::Malformed {
        reason: e.to_string(),
    })
}

/// Drop every record already expired at `now`.
pub fn retain_live<T>(mut snapshot: Snapshot<T>, now: Timestamp) -> Snapshot<T> {
    snapshot.retain(|_, record| !record.is_expired_at(now));
    snapshot
}
