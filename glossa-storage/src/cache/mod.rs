//! Two-tier translation cache.
//!
//! Translated lyric lines are expensive to produce, so they are cached under a
//! fingerprint of the source track and target mode.
//!
//! # Tiers
//!
//! - [`FastCache`]: bounded in-memory map with TTL expiry and LRU eviction.
//!   It persists itself to the durable tier as a single snapshot blob after a
//!   quiet period, and refuses snapshots that reach the size guard.
//! - [`DurableStore`]: larger asynchronous key-value store ([`LmdbDurableStore`]
//!   in production, [`InMemoryDurableStore`] otherwise) that also holds the
//!   snapshot blob and records imported from a legacy snapshot.
//! - [`CacheFacade`]: what callers use. Memory first, durable on a miss, and
//!   no error ever escapes a lookup.
//!
//! # Example
//!
//! ```ignore
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let store = Arc::new(LmdbDurableStore::new(DurableConfig::from_env(), clock.clone()));
//! let cache: CacheFacade<TranslatedLines, _> =
//!     CacheFacade::open(CacheConfig::from_env(), store, None, clock).await?;
//!
//! cache.set(fingerprint(uri, "romaji"), lines);
//! let hit = cache.get(&fingerprint(uri, "romaji")).await;
//! ```

pub mod facade;
pub mod fast;
pub mod legacy;
pub mod lmdb_backend;
pub mod memory;
pub mod metrics;
pub mod migration;
pub mod traits;

pub use facade::CacheFacade;
pub use fast::{FastCache, FlushOutcome};
pub use legacy::FileSnapshotStore;
pub use lmdb_backend::{LmdbDurableStore, LmdbStoreError, SCHEMA_VERSION, SCHEMA_VERSION_KEY};
pub use memory::InMemoryDurableStore;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use migration::{migrate_legacy_snapshot, MigrationReport, LEGACY_MIGRATION_MARKER};
pub use traits::{CachePayload, CacheStats, DurableStore, SnapshotStore};
