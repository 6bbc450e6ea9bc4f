//! Glossa Storage - Translation Cache Tiers
//!
//! In-memory and durable cache tiers for translated lyric lines, the facade
//! that combines them, and the legacy snapshot migration.
//! Shared types (records, config, errors, clock) live in glossa-core.

pub mod cache;

pub use cache::{
    migrate_legacy_snapshot, CacheFacade, CacheMetrics, CacheMetricsSnapshot, CachePayload,
    CacheStats, DurableStore, FastCache, FileSnapshotStore, FlushOutcome, InMemoryDurableStore,
    LmdbDurableStore, LmdbStoreError, MigrationReport, SnapshotStore, LEGACY_MIGRATION_MARKER,
};
