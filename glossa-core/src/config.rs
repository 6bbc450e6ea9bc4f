//! Cache configuration
//!
//! Defaults match the production settings. Both configs can be loaded from
//! environment variables; unparsable values fall back to the default.

use crate::error::{CacheResult, ConfigError};
use std::path::PathBuf;
use std::time::Duration;

const SECS_PER_DAY: f64 = 86_400.0;

// ============================================================================
// IN-MEMORY TIER
// ============================================================================

/// Configuration for the bounded in-memory tier and its write-back.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of records held in memory.
    pub max_size: usize,
    /// Lifetime of a record from the moment it is written.
    pub ttl: Duration,
    /// Quiet period before pending writes are flushed.
    pub flush_debounce: Duration,
    /// Snapshots at or above this many bytes are not written.
    pub snapshot_limit_bytes: usize,
    /// Fraction of the coldest records evicted when the tier is full.
    pub eviction_ratio: f64,
    /// Fraction evicted when a snapshot overflows the byte limit.
    pub overflow_eviction_ratio: f64,
    /// Durable namespace the snapshot is written under.
    pub snapshot_namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            flush_debounce: Duration::from_millis(2000),
            snapshot_limit_bytes: 4 * 1024 * 1024, // 4 MiB
            eviction_ratio: 0.2,
            overflow_eviction_ratio: 0.5,
            snapshot_namespace: "translations".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the record TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the flush debounce window.
    pub fn with_flush_debounce(mut self, debounce: Duration) -> Self {
        self.flush_debounce = debounce;
        self
    }

    /// Set the snapshot size guard.
    pub fn with_snapshot_limit(mut self, bytes: usize) -> Self {
        self.snapshot_limit_bytes = bytes;
        self
    }

    /// Set the capacity eviction ratio.
    pub fn with_eviction_ratio(mut self, ratio: f64) -> Self {
        self.eviction_ratio = ratio;
        self
    }

    /// Set the overflow eviction ratio.
    pub fn with_overflow_eviction_ratio(mut self, ratio: f64) -> Self {
        self.overflow_eviction_ratio = ratio;
        self
    }

    /// Set the snapshot namespace.
    pub fn with_snapshot_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.snapshot_namespace = namespace.into();
        self
    }

    /// TTL expressed in (possibly fractional) days.
    pub fn ttl_in_days(&self) -> f64 {
        self.ttl.as_secs_f64() / SECS_PER_DAY
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GLOSSA_CACHE_MAX_SIZE`: record capacity (default: 500)
    /// - `GLOSSA_CACHE_TTL_SECS`: record lifetime in seconds (default: 7 days)
    /// - `GLOSSA_CACHE_FLUSH_DEBOUNCE_MS`: flush debounce (default: 2000)
    /// - `GLOSSA_CACHE_SNAPSHOT_LIMIT_BYTES`: snapshot size guard (default: 4 MiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_size = env_parse("GLOSSA_CACHE_MAX_SIZE").unwrap_or(defaults.max_size);

        let ttl = env_parse("GLOSSA_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl);

        let flush_debounce = env_parse("GLOSSA_CACHE_FLUSH_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.flush_debounce);

        let snapshot_limit_bytes = env_parse("GLOSSA_CACHE_SNAPSHOT_LIMIT_BYTES")
            .unwrap_or(defaults.snapshot_limit_bytes);

        Self {
            max_size,
            ttl,
            flush_debounce,
            snapshot_limit_bytes,
            ..defaults
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_size >= 1
    /// - ttl > 0
    /// - snapshot_limit_bytes > 0
    /// - both eviction ratios in (0.0, 1.0]
    /// - snapshot_namespace is not empty
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_size == 0 {
            return Err(invalid("max_size", self.max_size, "must be at least 1"));
        }
        if self.ttl.is_zero() {
            return Err(invalid("ttl", format!("{:?}", self.ttl), "must be positive"));
        }
        if self.snapshot_limit_bytes == 0 {
            return Err(invalid(
                "snapshot_limit_bytes",
                self.snapshot_limit_bytes,
                "must be positive",
            ));
        }
        for (field, ratio) in [
            ("eviction_ratio", self.eviction_ratio),
            ("overflow_eviction_ratio", self.overflow_eviction_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(field, ratio, "must be in (0.0, 1.0]"));
            }
        }
        if self.snapshot_namespace.trim().is_empty() {
            return Err(invalid("snapshot_namespace", "\"\"", "must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// DURABLE TIER
// ============================================================================

/// Location and sizing of the durable LMDB environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableConfig {
    /// Directory holding the LMDB files.
    pub path: PathBuf,
    /// Maximum map size in megabytes.
    pub map_size_mb: usize,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./glossa-cache"),
            map_size_mb: 256,
        }
    }
}

impl DurableConfig {
    /// Create a config for `path` with the default map size.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the map size.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Create DurableConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GLOSSA_CACHE_DIR`: LMDB directory (default: ./glossa-cache)
    /// - `GLOSSA_CACHE_MAP_SIZE_MB`: LMDB map size (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let path = std::env::var("GLOSSA_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.path);
        let map_size_mb = env_parse("GLOSSA_CACHE_MAP_SIZE_MB").unwrap_or(defaults.map_size_mb);
        Self { path, map_size_mb }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CacheResult<()> {
        if self.map_size_mb == 0 {
            return Err(invalid("map_size_mb", self.map_size_mb, "must be at least 1"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::CacheError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
