//! SQLite package repository.
//!
//! All writes are `INSERT ... ON CONFLICT` upserts against the natural keys
//! declared in the schema, so replaying a pass converges on the same rows.
//! Deactivation is `active = 0`; there is no DELETE anywhere.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};

use crate::error::Result;
use crate::models::{
    DatabaseConfig, Game, GameVersion, Origin, PackageDraft, Seed, Source, SourceConfigEntry,
    SourceGraph, StoredPackage, VersionRecord, VersionSet,
};
use crate::storage::{CacheStore, PackageStore, UpsertOutcome};

/// Counts of rows written by [`Database::seed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub games: usize,
    pub sources: usize,
    pub config_entries: usize,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and apply pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;
        log::info!("Connected to {}", config.url);

        Self::from_pool(pool).await
    }

    /// A private in-memory database, used for dry runs and tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert games, sources and source config by slug.
    pub async fn seed(&self, seed: &Seed) -> Result<SeedReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = SeedReport::default();
        let now = Utc::now().timestamp();

        for game in &seed.games {
            sqlx::query(
                "INSERT INTO game (name, slug, created_at, updated_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(slug) DO UPDATE SET name = excluded.name, \
                 updated_at = excluded.updated_at",
            )
            .bind(&game.name)
            .bind(&game.slug)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            report.games += 1;
        }

        for source in &seed.sources {
            let source_id: i64 = sqlx::query_scalar(
                "INSERT INTO source (game_id, platform, slug, name, url, package_type, \
                 active, created_at, updated_at) \
                 SELECT id, ?, ?, ?, ?, ?, ?, ?, ? FROM game WHERE slug = ? \
                 ON CONFLICT(slug) DO UPDATE SET \
                   game_id = excluded.game_id, platform = excluded.platform, name = excluded.name, \
                   url = excluded.url, package_type = excluded.package_type, \
                   active = excluded.active, updated_at = excluded.updated_at \
                 RETURNING id",
            )
            .bind(&source.platform)
            .bind(&source.slug)
            .bind(&source.name)
            .bind(&source.url)
            .bind(&source.package_type)
            .bind(source.active)
            .bind(now)
            .bind(now)
            .bind(&source.game)
            .fetch_one(&mut *tx)
            .await?;
            report.sources += 1;

            for (key, value) in source.config_entries()? {
                sqlx::query(
                    "INSERT INTO source_config (source_id, key, value, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT(source_id, key) DO UPDATE SET value = excluded.value, \
                     updated_at = excluded.updated_at",
                )
                .bind(source_id)
                .bind(&key)
                .bind(&value)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                report.config_entries += 1;
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    /// All sources, active or not, ordered by id.
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT id, game_id, platform, slug, name, url, package_type, \
             active FROM source ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    async fn load_packages(&self, source_id: i64) -> Result<Vec<StoredPackage>> {
        let rows = sqlx::query(
            "SELECT id, slug, source_ref, name, version, active, last_seen_at \
             FROM package WHERE source_id = ? ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        let mut packages = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            packages.push(StoredPackage {
                id,
                source_id,
                slug: row.get("slug"),
                source_ref: row.get("source_ref"),
                name: row.get("name"),
                version: row.get("version"),
                active: row.get("active"),
                last_seen_at: row.get("last_seen_at"),
                versions: VersionSet::List(self.load_versions(id).await?),
            });
        }
        Ok(packages)
    }

    async fn load_versions(&self, package_id: i64) -> Result<Vec<VersionRecord>> {
        let rows = sqlx::query(
            "SELECT id, game_version_id, name, version, origin, active, created_at \
             FROM package_version WHERE package_id = ? ORDER BY id",
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let origin: Option<String> = row.get("origin");
                let created_at: i64 = row.get("created_at");
                VersionRecord {
                    id: Some(row.get("id")),
                    version: row.get("version"),
                    name: row.get("name"),
                    game_version_id: row.get("game_version_id"),
                    origin: origin.map(Origin::Resolved),
                    active: row.get("active"),
                    created_at: DateTime::<Utc>::from_timestamp(created_at, 0),
                }
            })
            .collect())
    }

    /// Find the row id for a draft by natural key, then by name for rows
    /// persisted without a `source_ref`.
    async fn find_package_id(
        tx: &mut Transaction<'_, Sqlite>,
        source_id: i64,
        draft: &PackageDraft,
    ) -> Result<Option<i64>> {
        let id = sqlx::query_scalar(
            "SELECT id FROM package WHERE source_id = ? AND slug = ? AND source_ref = ?",
        )
        .bind(source_id)
        .bind(&draft.slug)
        .bind(&draft.source_ref)
        .fetch_optional(&mut **tx)
        .await?;
        if id.is_some() {
            return Ok(id);
        }

        Ok(sqlx::query_scalar(
            "SELECT id FROM package WHERE source_id = ? AND source_ref = '' AND name = ? \
             ORDER BY id LIMIT 1",
        )
        .bind(source_id)
        .bind(&draft.name)
        .fetch_optional(&mut **tx)
        .await?)
    }
}

#[async_trait]
impl PackageStore for Database {
    async fn load_sources(&self, only: Option<&str>) -> Result<Vec<SourceGraph>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT id, game_id, platform, slug, name, url, package_type, active \
             FROM source WHERE active = 1 AND (? IS NULL OR slug = ?) ORDER BY id",
        )
        .bind(only)
        .bind(only)
        .fetch_all(&self.pool)
        .await?;

        let mut graphs = Vec::with_capacity(sources.len());
        for source in sources {
            let game = sqlx::query_as::<_, Game>(
                "SELECT id, name, slug, active FROM game WHERE id = ?",
            )
            .bind(source.game_id)
            .fetch_one(&self.pool)
            .await?;
            let config = sqlx::query_as::<_, SourceConfigEntry>(
                "SELECT key, value FROM source_config WHERE source_id = ? ORDER BY id",
            )
            .bind(source.id)
            .fetch_all(&self.pool)
            .await?;
            let packages = self.load_packages(source.id).await?;

            graphs.push(SourceGraph {
                source,
                game,
                config,
                packages,
            });
        }
        Ok(graphs)
    }

    async fn find_or_create_game_version(
        &self,
        game_id: i64,
        version: &str,
    ) -> Result<GameVersion> {
        sqlx::query(
            "INSERT INTO game_version (game_id, version) VALUES (?, ?) \
             ON CONFLICT(game_id, version) DO NOTHING",
        )
        .bind(game_id)
        .bind(version)
        .execute(&self.pool)
        .await?;

        let game_version = sqlx::query_as::<_, GameVersion>(
            "SELECT id, game_id, version FROM game_version WHERE game_id = ? AND version = ?",
        )
        .bind(game_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(game_version)
    }

    async fn upsert_package(
        &self,
        source_id: i64,
        draft: &PackageDraft,
        seen_at: i64,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let package_id = match Self::find_package_id(&mut tx, source_id, draft).await? {
            Some(id) => {
                sqlx::query(
                    "UPDATE package SET slug = ?, source_ref = ?, name = ?, \
                     version = COALESCE(?, version), active = 1, last_seen_at = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(&draft.slug)
                .bind(&draft.source_ref)
                .bind(&draft.name)
                .bind(draft.version.as_deref())
                .bind(seen_at)
                .bind(seen_at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    "INSERT INTO package (source_id, source_ref, slug, name, version, active, \
                     last_seen_at, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?) RETURNING id",
                )
                .bind(source_id)
                .bind(&draft.source_ref)
                .bind(&draft.slug)
                .bind(&draft.name)
                .bind(draft.version.as_deref())
                .bind(seen_at)
                .bind(seen_at)
                .bind(seen_at)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        for (key, value) in &draft.metadata {
            sqlx::query(
                "INSERT INTO package_metadata (package_id, key, value, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(package_id, key) DO UPDATE SET value = excluded.value, \
                 updated_at = excluded.updated_at",
            )
            .bind(package_id)
            .bind(key)
            .bind(value)
            .bind(seen_at)
            .bind(seen_at)
            .execute(&mut *tx)
            .await?;
        }

        let mut version_ids = Vec::with_capacity(draft.versions.len());
        for version in draft.versions.iter() {
            let origin = version.origin.as_ref().and_then(Origin::as_resolved);
            let created_at = version.created_at.map(|ts| ts.timestamp());
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO package_version (package_id, game_version_id, name, version, \
                 origin, active, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, COALESCE(?, ?), ?) \
                 ON CONFLICT(package_id, game_version_id, version) DO UPDATE SET \
                   name = excluded.name, \
                   origin = COALESCE(excluded.origin, package_version.origin), \
                   active = excluded.active, \
                   created_at = COALESCE(?, package_version.created_at), \
                   updated_at = excluded.updated_at \
                 RETURNING id",
            )
            .bind(package_id)
            .bind(version.game_version_id)
            .bind(&version.name)
            .bind(&version.version)
            .bind(origin)
            .bind(version.active)
            .bind(created_at)
            .bind(seen_at)
            .bind(seen_at)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await?;
            version_ids.push(id);
        }

        tx.commit().await?;
        Ok(UpsertOutcome {
            package_id,
            version_ids,
        })
    }

    async fn deactivate_stale(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE package SET active = 0, updated_at = ? \
             WHERE active = 1 AND (last_seen_at IS NULL OR last_seen_at < ?)",
        )
        .bind(Utc::now().timestamp())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = sqlx::query_scalar("SELECT value FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO cache (key, value, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{GameSeed, SourceSeed};
    use indexmap::IndexMap;

    /// One game with one source, seeded into a fresh in-memory database.
    pub(crate) async fn seeded(platform: &str) -> (Database, SourceGraph) {
        let db = Database::in_memory().await.unwrap();
        let seed = Seed {
            games: vec![GameSeed {
                slug: "minecraft".into(),
                name: "Minecraft: Java Edition".into(),
            }],
            sources: vec![SourceSeed {
                game: "minecraft".into(),
                slug: "spigot".into(),
                name: "Spigot".into(),
                platform: platform.into(),
                url: "https://hub.spigotmc.org/versions".into(),
                package_type: "jar".into(),
                active: true,
                config: IndexMap::new(),
            }],
        };
        db.seed(&seed).await.unwrap();
        let graph = db.load_sources(None).await.unwrap().remove(0);
        (db, graph)
    }

    fn draft(db_game_version: i64, versions: &[&str]) -> PackageDraft {
        let mut draft = PackageDraft::new("Spigot 1.16", "1.16", "1.16");
        for v in versions {
            draft.versions.push(VersionRecord::new(
                *v,
                format!("#{}", v),
                db_game_version,
                Origin::resolved(format!("https://hub.spigotmc.org/versions/{}.json", v)),
            ));
        }
        draft.version = versions.last().map(|v| v.to_string());
        draft
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (db, graph) = seeded("Spigot").await;
        assert_eq!(graph.source.slug, "spigot");
        assert_eq!(graph.game.slug, "minecraft");

        let seed = Seed {
            games: vec![GameSeed {
                slug: "minecraft".into(),
                name: "Minecraft".into(),
            }],
            sources: vec![],
        };
        db.seed(&seed).await.unwrap();
        db.seed(&seed).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_game_version_find_or_create() {
        let (db, graph) = seeded("Spigot").await;
        let first = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();
        let second = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.version, "1.16.5");
    }

    #[tokio::test]
    async fn test_natural_key_stability() {
        let (db, graph) = seeded("Spigot").await;
        let gv = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();

        let first = db
            .upsert_package(graph.source.id, &draft(gv.id, &["100", "101"]), 1_000)
            .await
            .unwrap();
        let second = db
            .upsert_package(graph.source.id, &draft(gv.id, &["100", "101"]), 2_000)
            .await
            .unwrap();

        assert_eq!(first, second);

        let graph = db.load_sources(Some("spigot")).await.unwrap().remove(0);
        assert_eq!(graph.packages.len(), 1);
        let package = &graph.packages[0];
        assert_eq!(package.version.as_deref(), Some("101"));
        assert_eq!(package.last_seen_at, Some(2_000));
        assert_eq!(package.versions.len(), 2);
    }

    #[tokio::test]
    async fn test_deferred_origin_keeps_stored_origin() {
        let (db, graph) = seeded("Spigot").await;
        let gv = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();
        db.upsert_package(graph.source.id, &draft(gv.id, &["100"]), 1_000)
            .await
            .unwrap();

        let mut deferred = draft(gv.id, &["100"]);
        for version in deferred.versions.iter_mut() {
            version.origin = Some(Origin::deferred(|| async { Ok("unused".to_string()) }));
        }
        db.upsert_package(graph.source.id, &deferred, 2_000)
            .await
            .unwrap();

        let graph = db.load_sources(None).await.unwrap().remove(0);
        let version = graph.packages[0].versions.iter().next().unwrap();
        assert_eq!(
            version.origin.as_ref().and_then(Origin::as_resolved),
            Some("https://hub.spigotmc.org/versions/100.json")
        );
    }

    #[tokio::test]
    async fn test_legacy_row_matched_by_name() {
        let (db, graph) = seeded("Spigot").await;
        let legacy_id: i64 = sqlx::query_scalar(
            "INSERT INTO package (source_id, source_ref, slug, name) VALUES (?, '', 'old', \
             'Spigot 1.16') RETURNING id",
        )
        .bind(graph.source.id)
        .fetch_one(db.pool())
        .await
        .unwrap();

        let gv = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();
        let outcome = db
            .upsert_package(graph.source.id, &draft(gv.id, &["100"]), 1_000)
            .await
            .unwrap();
        assert_eq!(outcome.package_id, legacy_id);
    }

    #[tokio::test]
    async fn test_deactivate_stale() {
        let (db, graph) = seeded("Spigot").await;
        let gv = db.find_or_create_game_version(graph.game.id, "1.16.5").await.unwrap();

        db.upsert_package(graph.source.id, &draft(gv.id, &["100"]), 1_000)
            .await
            .unwrap();
        let mut fresh = PackageDraft::new("Spigot 1.17", "1.17", "1.17");
        fresh.version = None;
        db.upsert_package(graph.source.id, &fresh, 5_000).await.unwrap();

        assert_eq!(db.deactivate_stale(2_000).await.unwrap(), 1);
        // Already inactive rows are not counted again
        assert_eq!(db.deactivate_stale(2_000).await.unwrap(), 0);

        let graph = db.load_sources(None).await.unwrap().remove(0);
        let active: Vec<_> = graph.packages.iter().map(|p| (p.slug.as_str(), p.active)).collect();
        assert_eq!(active, vec![("1.16", false), ("1.17", true)]);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM package")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(total, 2);
    }
}
