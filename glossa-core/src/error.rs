//! Error types for glossa cache operations

use std::fmt;
use thiserror::Error;

/// Durable-tier operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurableOp {
    Open,
    Get,
    Set,
    Delete,
    Clear,
    Import,
    Snapshot,
    Marker,
    Purge,
}

impl fmt::Display for DurableOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DurableOp::Open => "open",
            DurableOp::Get => "get",
            DurableOp::Set => "set",
            DurableOp::Delete => "delete",
            DurableOp::Clear => "clear",
            DurableOp::Import => "bulk import",
            DurableOp::Snapshot => "snapshot",
            DurableOp::Marker => "marker",
            DurableOp::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// Durable storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Durable store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Durable {operation} failed: {reason}")]
    OperationFailed { operation: DurableOp, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Shorthand for [`StorageError::OperationFailed`].
    pub fn failed(operation: DurableOp, reason: impl fmt::Display) -> Self {
        StorageError::OperationFailed {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Persisted snapshot errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Snapshot of {size} bytes exceeds the {limit} byte limit")]
    Overflow { size: usize, limit: usize },

    #[error("Malformed persisted snapshot: {reason}")]
    Malformed { reason: String },

    #[error("Snapshot serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all glossa cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_unavailable() {
        let err = StorageError::Unavailable {
            reason: "permission denied".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_storage_error_display_operation() {
        let err = StorageError::failed(DurableOp::Import, "map full");
        assert_eq!(format!("{}", err), "Durable bulk import failed: map full");
    }

    #[test]
    fn test_snapshot_error_display_overflow() {
        let err = SnapshotError::Overflow {
            size: 5_000_000,
            limit: 4_194_304,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("5000000"));
        assert!(msg.contains("4194304"));
    }

    #[test]
    fn test_cache_error_from_conversions() {
        let err: CacheError = SnapshotError::Malformed {
            reason: "eof".to_string(),
        }
        .into();
        assert!(matches!(err, CacheError::Snapshot(SnapshotError::Malformed { .. })));

        let err: CacheError = StorageError::LockPoisoned.into();
        assert!(format!("{}", err).starts_with("Storage error"));
    }
}
