//! Deactivation of packages that upstream stopped reporting.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::storage::PackageStore;

/// Deactivate packages not seen within `threshold_secs` of `now`.
///
/// Runs independently of change detection: any package whose
/// `last_seen_at` is older than the cutoff is deactivated, whether or not
/// it ever produced a build. Rows are never deleted.
pub async fn prune(
    store: &dyn PackageStore,
    threshold_secs: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let cutoff = now.timestamp() - threshold_secs;
    log::debug!("Pruning packages not seen since {}", cutoff);

    let count = store.deactivate_stale(cutoff).await?;
    if count > 0 {
        log::info!("Deactivated {} stale packages", count);
    } else {
        log::info!("No stale packages");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageDraft;
    use crate::storage::sqlite::tests::seeded;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_prune_uses_threshold() {
        let (db, graph) = seeded("Spigot").await;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let week = 604_800;

        let stale = PackageDraft::new("Spigot 1.8", "1.8", "1.8");
        db.upsert_package(graph.source.id, &stale, now.timestamp() - week - 1)
            .await
            .unwrap();
        let recent = PackageDraft::new("Spigot 1.16", "1.16", "1.16");
        db.upsert_package(graph.source.id, &recent, now.timestamp() - week + 60)
            .await
            .unwrap();

        assert_eq!(prune(&db, week, now).await.unwrap(), 1);
        assert_eq!(prune(&db, week, now).await.unwrap(), 0);

        let graph = db.load_sources(None).await.unwrap().remove(0);
        let active: Vec<_> = graph
            .packages
            .iter()
            .filter(|p| p.active)
            .map(|p| p.slug.as_str())
            .collect();
        assert_eq!(active, vec!["1.16"]);
    }
}
