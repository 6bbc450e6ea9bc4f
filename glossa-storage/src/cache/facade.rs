//! Two-tier cache facade.
//!
//! The single entry point callers use. Reads go to the in-memory tier first
//! and fall back to the durable tier; writes land in memory and reach the
//! durable tier through the in-memory tier's debounced snapshot.
//!
//! Nothing here is fatal. If the durable tier cannot be opened the facade
//! keeps working as a memory-only cache, and every durable error on a read or
//! write is logged and treated as a miss.

use std::future::Future;
use std::sync::Arc;

use glossa_core::{CacheConfig, CacheResult, Clock};

use super::fast::{FastCache, FlushOutcome};
use super::migration::migrate_legacy_snapshot;
use super::traits::{CachePayload, CacheStats, DurableStore, SnapshotStore};

/// Two-tier cache: bounded memory in front of a durable store.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(LmdbDurableStore::new(DurableConfig::from_env(), clock.clone()));
/// let cache: CacheFacade<TranslatedLines, _> =
///     CacheFacade::open(CacheConfig::from_env(), store, None, clock).await?;
///
/// let key = fingerprint(track_uri, "en");
/// let lines = cache
///     .get_or_insert_with(&key, || translate(track_uri, "en"))
///     .await?;
/// ```
pub struct CacheFacade<T: CachePayload, D: DurableStore + 'static> {
    fast: FastCache<T>,
    durable: Arc<D>,
    clock: Arc<dyn Clock>,
    durable_available: bool,
}

impl<T, D> CacheFacade<T, D>
where
    T: CachePayload,
    D: DurableStore + 'static,
{
    /// Open the durable tier, run the legacy migration if `legacy` is given,
    /// and rehydrate memory from the persisted snapshot.
    ///
    /// Only an invalid `config` is an error. A durable tier that fails to open
    /// leaves the facade in memory-only mode.
    pub async fn open(
        config: CacheConfig,
        durable: Arc<D>,
        legacy: Option<Arc<dyn SnapshotStore>>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        config.validate()?;

        let durable_available = match durable.open().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Durable tier unavailable, running memory-only");
                false
            }
        };

        let fast = if durable_available {
            if let Some(legacy) = legacy {
                let namespace = config.snapshot_namespace.as_str();
                if let Err(e) = migrate_legacy_snapshot::<T, D>(
                    legacy.as_ref(),
                    durable.as_ref(),
                    namespace,
                    clock.as_ref(),
                )
                .await
                {
                    tracing::warn!(error = %e, namespace, "Legacy snapshot migration failed");
                }
            }
            let sink: Arc<dyn SnapshotStore> = durable.clone();
            FastCache::with_sink(config, clock.clone(), sink)
        } else {
            FastCache::new(config, clock.clone())
        };
        fast.load_snapshot().await;

        Ok(Self {
            fast,
            durable,
            clock,
            durable_available,
        })
    }

    /// Look up `key`, falling back to the durable tier on a memory miss.
    ///
    /// A durable hit is copied into memory with its original expiry and is
    /// not written back.
    pub async fn get(&self, key: &str) -> Option<T> {
        if let Some(data) = self.fast.get(key) {
            return Some(data);
        }
        if !self.durable_available {
            return None;
        }

        match self.durable.get::<T>(key).await {
            Ok(Some(mut record)) => {
                self.fast.metrics().record_durable_hit();
                record.touch(self.clock.now());
                let data = record.data.clone();
                if self.fast.restore(key, record, false) {
                    tracing::debug!(key, "Repopulated memory from durable tier");
                }
                Some(data)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key, "Durable read failed, treating as miss");
                None
            }
        }
    }

    /// Store `data` under `key` with the configured TTL.
    pub fn set(&self, key: impl Into<String>, data: T) {
        self.fast.set(key, data);
    }

    /// Return the cached value for `key`, or produce, cache and return it.
    ///
    /// A producer error is returned as-is and nothing is cached.
    pub async fn get_or_insert_with<F, Fut, E>(&self, key: &str, produce: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let data = produce().await?;
        self.set(key, data.clone());
        Ok(data)
    }

    /// Remove `key` from both tiers. Returns whether either tier held it.
    pub async fn remove(&self, key: &str) -> bool {
        let in_memory = self.fast.remove(key);
        let in_durable = if self.durable_available {
            self.durable.delete(key).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, key, "Durable delete failed");
                false
            })
        } else {
            false
        };
        in_memory || in_durable
    }

    /// Empty both tiers.
    pub async fn clear_all(&self) {
        self.fast.clear_all().await;
        if self.durable_available {
            if let Err(e) = self.durable.clear().await {
                tracing::warn!(error = %e, "Failed to clear durable tier");
            }
        }
        tracing::info!("Cache cleared");
    }

    /// Remove every record whose key contains `pattern` from both tiers.
    ///
    /// Returns how many in-memory records were removed.
    pub async fn clear_by_key_pattern(&self, pattern: &str) -> usize {
        let removed = self.fast.clear_by_key_pattern(pattern);
        if self.durable_available && !pattern.is_empty() {
            match self.durable.delete_matching(pattern).await {
                Ok(deleted) => {
                    tracing::debug!(pattern, removed, deleted, "Invalidated by key pattern");
                }
                Err(e) => {
                    tracing::warn!(error = %e, pattern, "Durable pattern delete failed");
                }
            }
        }
        removed
    }

    /// In-memory tier statistics. `hits`/`misses` count memory lookups;
    /// `durable_hits` counts the misses the durable tier answered.
    pub fn stats(&self) -> CacheStats {
        self.fast.stats()
    }

    /// Physically remove expired durable records.
    pub async fn purge_expired(&self) -> u64 {
        if !self.durable_available {
            return 0;
        }
        self.durable.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Durable purge failed");
            0
        })
    }

    /// Whether the durable tier opened successfully.
    pub fn durable_available(&self) -> bool {
        self.durable_available
    }

    /// The in-memory tier.
    pub fn fast(&self) -> &FastCache<T> {
        &self.fast
    }

    /// The durable tier.
    pub fn durable(&self) -> &Arc<D> {
        &self.durable
    }

    /// Flush pending writes immediately. Call before shutdown.
    pub async fn close(&self) -> FlushOutcome {
        let outcome = self.fast.flush_now().await;
        tracing::debug!(?outcome, "Cache closed");
        outcome
    }
}
