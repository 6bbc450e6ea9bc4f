//! Glossa Core - Cache Record Types
//!
//! Pure data structures shared by every cache tier. No I/O lives here:
//! records, the persisted snapshot codec, clocks, key fingerprints,
//! configuration and the error taxonomy.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod record;
pub mod snapshot;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DurableConfig};
pub use error::{CacheError, CacheResult, ConfigError, DurableOp, SnapshotError, StorageError};
pub use key::{fingerprint, source_digest};
pub use record::CacheRecord;
pub use snapshot::{decode_snapshot, encode_snapshot, retain_live, Snapshot};
