//! Storage abstractions for package persistence and the adapter cache.
//!
//! - [`Database`]: SQLite-backed package repository and cache table
//! - [`CacheService`]: per-source key/value cache with an in-process layer
//! - [`SeedStore`]: local `{source_id}.json` seed documents

pub mod cache;
pub mod local;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{GameVersion, PackageDraft, SourceGraph};

// Re-export for convenience
pub use cache::{CacheService, SourceCache};
pub use local::SeedStore;
pub use sqlite::{Database, SeedReport};

/// Result of persisting one package draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub package_id: i64,
    /// Row ids of the upserted versions, in draft order
    pub version_ids: Vec<i64>,
}

/// Trait for package repository backends.
///
/// Writes are upserts by natural key; nothing is ever deleted.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Load active sources with their game, config and prior packages.
    ///
    /// `only` restricts the result to the source with that slug.
    async fn load_sources(&self, only: Option<&str>) -> Result<Vec<SourceGraph>>;

    /// Look up a game version, creating it on first observation.
    async fn find_or_create_game_version(&self, game_id: i64, version: &str)
    -> Result<GameVersion>;

    /// Upsert a package, its metadata and its versions.
    async fn upsert_package(
        &self,
        source_id: i64,
        draft: &PackageDraft,
        seen_at: i64,
    ) -> Result<UpsertOutcome>;

    /// Deactivate active packages not seen since `cutoff` (unix seconds).
    async fn deactivate_stale(&self, cutoff: i64) -> Result<u64>;
}

/// Trait for durable cache backends.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Last write wins.
    async fn put(&self, key: &str, value: &Value) -> Result<()>;
}
