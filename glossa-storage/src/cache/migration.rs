//! One-time import of a legacy snapshot into the durable tier.

use glossa_core::{decode_snapshot, CacheResult, Clock};

use super::traits::{CachePayload, DurableStore, SnapshotStore};

/// Marker name prefix recording that a namespace has been migrated.
pub const LEGACY_MIGRATION_MARKER: &str = "legacy_snapshot_migrated";

/// What a migration run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records found in the legacy snapshot.
    pub found: u64,
    /// Live records written to the durable tier.
    pub imported: u64,
    /// Records dropped because they had already expired.
    pub skipped_expired: u64,
}

fn marker_name(namespace: &str) -> String {
    format!("{LEGACY_MIGRATION_MARKER}:{namespace}")
}

/// Import the legacy snapshot stored under `namespace` into `durable`.
///
/// Returns `Ok(None)` when the namespace was already migrated or there is no
/// legacy snapshot. Otherwise the live records are bulk-imported, a marker is
/// written so the import never runs twice, and the legacy blob is removed.
///
/// A malformed legacy blob is discarded and counts as an empty import. If the
/// import itself fails nothing is marked and the next run retries. The marker
/// value is the migration time according to `clock`.
pub async fn migrate_legacy_snapshot<T, D>(
    legacy: &dyn SnapshotStore,
    durable: &D,
    namespace: &str,
    clock: &dyn Clock,
) -> CacheResult<Option<MigrationReport>>
where
    T: CachePayload,
    D: DurableStore,
{
    let marker = marker_name(namespace);
    if durable.read_marker(&marker).await?.is_some() {
        tracing::debug!(namespace, "Legacy snapshot already migrated");
        return Ok(None);
    }

    let Some(blob) = legacy.load_snapshot(namespace).await? else {
        return Ok(None);
    };

    let report = match decode_snapshot::<T>(&blob) {
        Ok(snapshot) => {
            let found = snapshot.len() as u64;
            let imported = durable.bulk_import(&snapshot).await?;
            MigrationReport {
                found,
                imported,
                skipped_expired: found.saturating_sub(imported),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, namespace, "Discarding malformed legacy snapshot");
            MigrationReport::default()
        }
    };

    durable
        .write_marker(&marker, &clock.now().to_rfc3339())
        .await?;

    if let Err(e) = legacy.remove_snapshot(namespace).await {
        tracing::warn!(error = %e, namespace, "Failed to remove migrated legacy snapshot");
    }

    tracing::info!(
        namespace,
        found = report.found,
        imported = report.imported,
        skipped_expired = report.skipped_expired,
        "Legacy snapshot migrated"
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryDurableStore;
    use chrono::{TimeDelta, TimeZone, Utc};
    use glossa_core::{encode_snapshot, CacheRecord, Clock, ManualClock, Snapshot};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (InMemoryDurableStore, InMemoryDurableStore, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 8, 9, 7, 0, 0).unwrap());
        let legacy = InMemoryDurableStore::new(Arc::new(clock.clone()));
        let durable = InMemoryDurableStore::new(Arc::new(clock.clone()));
        (legacy, durable, clock)
    }

    async fn seed_legacy(legacy: &InMemoryDurableStore, clock: &ManualClock) {
        let now = clock.now();
        let mut snapshot: Snapshot<String> = Snapshot::new();
        snapshot.insert(
            "a:en".to_string(),
            CacheRecord::new("a".to_string(), now, Duration::from_secs(3600)),
        );
        snapshot.insert(
            "b:en".to_string(),
            CacheRecord::new("b".to_string(), now, Duration::from_secs(3600)),
        );
        snapshot.insert(
            "old:en".to_string(),
            CacheRecord::new(
                "old".to_string(),
                now - TimeDelta::days(8),
                Duration::from_secs(7 * 86_400),
            ),
        );
        let blob = encode_snapshot(&snapshot, usize::MAX).unwrap();
        legacy.store_snapshot("translations", blob).await.unwrap();
    }

    #[tokio::test]
    async fn test_migrates_live_records_once() {
        let (legacy, durable, clock) = setup();
        seed_legacy(&legacy, &clock).await;

        let report = migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .unwrap()
            .expect("first run should migrate");
        assert_eq!(
            report,
            MigrationReport {
                found: 3,
                imported: 2,
                skipped_expired: 1,
            }
        );
        assert_eq!(durable.len().await.unwrap(), 2);
        assert!(legacy.load_snapshot("translations").await.unwrap().is_none());
        assert_eq!(
            durable.read_marker(&marker_name("translations")).await.unwrap(),
            Some(clock.now().to_rfc3339())
        );

        // Even if the legacy blob reappears, the marker stops a second import.
        seed_legacy(&legacy, &clock).await;
        durable.clear().await.unwrap();
        let again = migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(durable.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nothing_to_migrate() {
        let (legacy, durable, clock) = setup();
        let report = migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(durable
            .read_marker(&marker_name("translations"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_import_is_retried() {
        let (legacy, durable, clock) = setup();
        seed_legacy(&legacy, &clock).await;

        durable.set_fail_writes(true);
        assert!(migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .is_err());
        assert!(legacy.load_snapshot("translations").await.unwrap().is_some());

        durable.set_fail_writes(false);
        let report = migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .unwrap();
        assert_eq!(report.map(|r| r.imported), Some(2));
    }

    #[tokio::test]
    async fn test_malformed_legacy_blob_is_discarded() {
        let (legacy, durable, clock) = setup();
        legacy
            .store_snapshot("translations", b"not json".to_vec())
            .await
            .unwrap();

        let report = migrate_legacy_snapshot::<String, _>(&legacy, &durable, "translations", &clock)
            .await
            .unwrap();
        assert_eq!(report, Some(MigrationReport::default()));
        assert!(legacy.load_snapshot("translations").await.unwrap().is_none());
    }
}
