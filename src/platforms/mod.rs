//! Publisher adapters.
//!
//! Every adapter implements [`Platform`]: `fetch` (remote data merged with an
//! optional local seed document), `filter` and `process`. [`scrape`] chains
//! the three and is the only entry point the orchestrator uses.

pub mod curse;
pub mod github;
pub mod jenkins;
pub mod minecraft_bedrock;
pub mod minecraft_java;
pub mod paper;
pub mod spigot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use scraper::Html;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    Game, GameVersion, ScrapeOutput, Source, SourceGraph, SourceSettings, StoredPackage,
};
use crate::storage::{CacheService, PackageStore, SeedStore, SourceCache};
use crate::utils::http;

pub use curse::CursePlatform;
pub use github::GitHubPlatform;
pub use jenkins::JenkinsPlatform;
pub use minecraft_bedrock::MinecraftBedrockPlatform;
pub use minecraft_java::MinecraftJavaPlatform;
pub use paper::PaperPlatform;
pub use spigot::SpigotPlatform;

/// Raw fetch output: a flat list, or lists grouped under string keys.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult<T = Value> {
    List(Vec<T>),
    Keyed(IndexMap<String, Vec<T>>),
}

impl FetchResult<Value> {
    /// Interpret a JSON document.
    ///
    /// Arrays are lists; objects are keyed, with non-array members treated as
    /// one-element lists.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Self::List(items)),
            Value::Object(map) => Ok(Self::Keyed(
                map.into_iter()
                    .map(|(key, value)| match value {
                        Value::Array(items) => (key, items),
                        other => (key, vec![other]),
                    })
                    .collect(),
            )),
            other => Err(AppError::validation(format!(
                "expected a JSON array or object, got {}",
                other
            ))),
        }
    }
}

impl<T> FetchResult<T> {
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Keyed(map) => map.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge fetch results in order.
///
/// Absent inputs are skipped and all-absent yields `None`. Lists concatenate;
/// keyed results merge key-wise, concatenating the lists under shared keys
/// and keeping first-seen key order. Mixing the two shapes is an error.
pub fn merge<T>(inputs: Vec<Option<FetchResult<T>>>) -> Result<Option<FetchResult<T>>> {
    let mut merged: Option<FetchResult<T>> = None;

    for input in inputs.into_iter().flatten() {
        merged = Some(match (merged, input) {
            (None, input) => input,
            (Some(FetchResult::List(mut acc)), FetchResult::List(items)) => {
                acc.extend(items);
                FetchResult::List(acc)
            }
            (Some(FetchResult::Keyed(mut acc)), FetchResult::Keyed(map)) => {
                for (key, items) in map {
                    acc.entry(key).or_default().extend(items);
                }
                FetchResult::Keyed(acc)
            }
            _ => return Err(AppError::InvalidShape),
        });
    }

    Ok(merged)
}

/// Shared services handed to every adapter.
#[derive(Clone)]
pub struct PlatformDeps {
    pub client: reqwest::Client,
    pub cache: CacheService,
    pub store: Arc<dyn PackageStore>,
    pub seeds: SeedStore,
    /// Bound on concurrent sub-requests inside one adapter
    pub concurrency: usize,
    /// Pause before each request
    pub request_delay: Duration,
}

/// Everything an adapter knows about its source.
pub struct PlatformContext {
    pub source: Source,
    pub game: Game,
    pub settings: SourceSettings,
    /// Packages persisted before this pass
    pub packages: Vec<StoredPackage>,
    pub client: reqwest::Client,
    pub cache: SourceCache,
    pub store: Arc<dyn PackageStore>,
    pub seeds: SeedStore,
    pub concurrency: usize,
    request_delay: Duration,
    game_versions: Mutex<HashMap<String, GameVersion>>,
}

impl PlatformContext {
    pub fn new(graph: SourceGraph, deps: &PlatformDeps) -> Self {
        let settings = graph.settings();
        Self {
            cache: deps.cache.scope(graph.source.id),
            source: graph.source,
            game: graph.game,
            settings,
            packages: graph.packages,
            client: deps.client.clone(),
            store: Arc::clone(&deps.store),
            seeds: deps.seeds.clone(),
            concurrency: deps.concurrency.max(1),
            request_delay: deps.request_delay,
            game_versions: Mutex::new(HashMap::new()),
        }
    }

    /// Source display name.
    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Find or create a game version, cached for the rest of the pass.
    pub async fn find_game_version(&self, version: &str) -> Result<GameVersion> {
        if let Some(found) = self.game_versions.lock().await.get(version) {
            return Ok(found.clone());
        }

        let found = self
            .store
            .find_or_create_game_version(self.game.id, version)
            .await?;
        self.game_versions
            .lock()
            .await
            .insert(version.to_string(), found.clone());
        Ok(found)
    }

    async fn throttle(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.throttle().await;
        http::get_json(&self.client, url).await
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.throttle().await;
        http::get_text(&self.client, url).await
    }

    /// Fetch and parse an HTML page. Drop the document before the next `.await`.
    pub async fn get_html(&self, url: &str) -> Result<Html> {
        self.throttle().await;
        http::fetch_page_async(&self.client, url).await
    }

    /// Fetch JSON through the source cache, storing it on a miss.
    pub async fn cached_json<T>(&self, key: &str, url: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(hit) = self.cache.get(key).await? {
            return Ok(hit);
        }
        let value: T = self.get_json(url).await?;
        self.cache.put(key, &value).await?;
        Ok(value)
    }
}

/// Adapter contract.
#[async_trait]
pub trait Platform: Send + Sync {
    fn context(&self) -> &PlatformContext;

    /// Query the publisher.
    async fn fetch_remote(&self) -> Result<Option<FetchResult>>;

    /// Load `{seed_dir}/{source_id}.json` if present.
    async fn fetch_local(&self) -> Result<Option<FetchResult>> {
        let ctx = self.context();
        match ctx.seeds.load::<Value>(ctx.source.id).await? {
            Some(doc) => Ok(Some(FetchResult::from_json(doc)?)),
            None => Ok(None),
        }
    }

    async fn fetch(&self) -> Result<Option<FetchResult>> {
        log::debug!("[{}] Fetching resources", self.context().name());
        let remote = self.fetch_remote().await?;
        let local = self.fetch_local().await?;
        merge(vec![remote, local])
    }

    /// Keep or drop one item of a list-shaped fetch result.
    fn filter(&self, _item: &Value) -> bool {
        true
    }

    /// Normalize fetched data into packages.
    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput>;
}

/// Run fetch, filter (list results only) and process.
pub async fn scrape(platform: &dyn Platform) -> Result<ScrapeOutput> {
    let name = platform.context().name().to_string();
    let fetched = platform.fetch().await?;
    if fetched.as_ref().is_none_or(FetchResult::is_empty) {
        log::warn!("[{}] Nothing fetched", name);
    }
    let data = match fetched {
        Some(FetchResult::List(items)) => {
            let total = items.len();
            let kept: Vec<Value> = items
                .into_iter()
                .filter(|item| platform.filter(item))
                .collect();
            log::debug!("[{}] Filtered {} of {} items", name, kept.len(), total);
            Some(FetchResult::List(kept))
        }
        other => other,
    };

    let output = platform.process(data).await?;
    log::info!("[{}] Produced {} packages", name, output.packages.len());
    Ok(output)
}

/// Constructor for one adapter kind.
pub type PlatformFactory =
    Arc<dyn Fn(PlatformContext) -> Result<Box<dyn Platform>> + Send + Sync>;

/// Adapter constructors keyed by platform name.
#[derive(Clone)]
pub struct PlatformRegistry {
    factories: HashMap<String, PlatformFactory>,
}

impl PlatformRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, platform: impl Into<String>, factory: F)
    where
        F: Fn(PlatformContext) -> Result<Box<dyn Platform>> + Send + Sync + 'static,
    {
        self.factories.insert(platform.into(), Arc::new(factory));
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.factories.contains_key(platform)
    }

    /// Registered platform names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, ctx: PlatformContext) -> Result<Box<dyn Platform>> {
        let platform = ctx.source.platform.clone();
        match self.factories.get(&platform) {
            Some(factory) => factory(ctx),
            None => Err(AppError::platform(platform, "no adapter registered")),
        }
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("MinecraftJava", |ctx| {
            Ok(Box::new(MinecraftJavaPlatform::new(ctx)) as Box<dyn Platform>)
        });
        registry.register("Spigot", |ctx| {
            Ok(Box::new(SpigotPlatform::new(ctx)) as Box<dyn Platform>)
        });
        registry.register("Jenkins", |ctx| {
            Ok(Box::new(JenkinsPlatform::new(ctx)?) as Box<dyn Platform>)
        });
        registry.register("Curse", |ctx| {
            Ok(Box::new(CursePlatform::new(ctx)) as Box<dyn Platform>)
        });
        registry.register("GitHub", |ctx| {
            Ok(Box::new(GitHubPlatform::new(ctx)?) as Box<dyn Platform>)
        });
        registry.register("MinecraftBedrock", |ctx| {
            Ok(Box::new(MinecraftBedrockPlatform::new(ctx)) as Box<dyn Platform>)
        });
        registry.register("Paper", |ctx| {
            Ok(Box::new(PaperPlatform::new(ctx)) as Box<dyn Platform>)
        });
        registry
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Origin, PackageDraft, VersionRecord};
    use crate::storage::sqlite::tests::seeded;
    use crate::storage::{CacheStore, Database};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Adapter context over a seeded in-memory database.
    pub(crate) async fn test_context(
        platform: &str,
        seed_dir: &std::path::Path,
    ) -> (Database, PlatformContext) {
        let (db, graph) = seeded(platform).await;
        let store = Arc::new(db.clone());
        let deps = PlatformDeps {
            client: reqwest::Client::new(),
            cache: CacheService::new(store.clone()),
            store,
            seeds: SeedStore::new(seed_dir),
            concurrency: 2,
            request_delay: Duration::ZERO,
        };
        (db, PlatformContext::new(graph, &deps))
    }

    /// Durable cache that answers every lookup with `value` after a pause,
    /// recording the most lookups ever in flight at once.
    struct GaugedCache {
        value: Value,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl GaugedCache {
        fn new(value: Value) -> Self {
            Self {
                value,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CacheStore for GaugedCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.value.clone()))
        }

        async fn put(&self, _key: &str, _value: &Value) -> Result<()> {
            Ok(())
        }
    }

    /// Adapter context whose cache lookups go through a [`GaugedCache`].
    async fn gauged_context(
        platform: &str,
        seed_dir: &std::path::Path,
        concurrency: usize,
        value: Value,
    ) -> (Database, PlatformContext, Arc<GaugedCache>) {
        let (db, graph) = seeded(platform).await;
        let gauge = Arc::new(GaugedCache::new(value));
        let deps = PlatformDeps {
            client: reqwest::Client::new(),
            cache: CacheService::new(gauge.clone()),
            store: Arc::new(db.clone()),
            seeds: SeedStore::new(seed_dir),
            concurrency,
            request_delay: Duration::ZERO,
        };
        (db, PlatformContext::new(graph, &deps), gauge)
    }

    /// Serves a fixed remote result and groups items by their `group` field.
    struct FixturePlatform {
        ctx: PlatformContext,
        remote: Option<FetchResult>,
    }

    #[async_trait]
    impl Platform for FixturePlatform {
        fn context(&self) -> &PlatformContext {
            &self.ctx
        }

        async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
            Ok(self.remote.clone())
        }

        fn filter(&self, item: &Value) -> bool {
            item["group"] != "ignored"
        }

        async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
            let mut output = ScrapeOutput::default();
            let items = match data {
                Some(FetchResult::List(items)) => items,
                Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
                None => Vec::new(),
            };
            for item in items {
                let group = item["group"].as_str().unwrap_or_default().to_string();
                let version = item["v"].to_string();
                let gv = self.ctx.find_game_version(&group).await?;
                output
                    .packages
                    .entry(group.clone())
                    .or_insert_with(|| PackageDraft::new(&group, &group, &group))
                    .versions
                    .push(VersionRecord::new(&version, &version, gv.id, Origin::resolved("u")));
            }
            Ok(output)
        }
    }

    #[test]
    fn test_merge_keyed() {
        let a = FetchResult::from_json(json!({"a": [1]})).unwrap();
        let b = FetchResult::from_json(json!({"a": [2], "b": [3]})).unwrap();
        let merged = merge(vec![Some(a), Some(b)]).unwrap().unwrap();

        let FetchResult::Keyed(map) = merged else {
            panic!("expected keyed result");
        };
        assert_eq!(map["a"], vec![json!(1), json!(2)]);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_lists() {
        let merged = merge(vec![
            Some(FetchResult::List(vec![1])),
            Some(FetchResult::List(vec![2])),
        ])
        .unwrap();
        assert_eq!(merged, Some(FetchResult::List(vec![1, 2])));
    }

    #[test]
    fn test_merge_mixed_shapes_fails() {
        let mut keyed = IndexMap::new();
        keyed.insert("a".to_string(), vec![2]);
        let result = merge(vec![
            Some(FetchResult::List(vec![1])),
            Some(FetchResult::Keyed(keyed)),
        ]);
        assert!(matches!(result, Err(AppError::InvalidShape)));
    }

    #[test]
    fn test_merge_skips_absent() {
        let merged = merge(vec![None, Some(FetchResult::List(vec![1])), None]).unwrap();
        assert_eq!(merged, Some(FetchResult::List(vec![1])));
        assert_eq!(merge::<i32>(vec![None, None]).unwrap(), None);
    }

    #[test]
    fn test_from_json_wraps_scalars() {
        let result = FetchResult::from_json(json!({"a": 1, "b": [2, 3]})).unwrap();
        assert_eq!(result.len(), 3);
        assert!(FetchResult::from_json(json!("text")).is_err());
    }

    #[tokio::test]
    async fn test_scrape_merges_local_seed_and_filters() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("Fixture", temp.path()).await;
        std::fs::write(
            temp.path().join(format!("{}.json", ctx.source.id)),
            r#"[{"group": "1.8", "v": 3}, {"group": "ignored", "v": 4}]"#,
        )
        .unwrap();

        let platform = FixturePlatform {
            ctx,
            remote: Some(FetchResult::List(vec![
                json!({"group": "1.16", "v": 1}),
                json!({"group": "1.16", "v": 2}),
            ])),
        };
        let output = scrape(&platform).await.unwrap();

        assert_eq!(output.packages.keys().collect::<Vec<_>>(), vec!["1.16", "1.8"]);
        assert_eq!(output.packages["1.16"].versions.len(), 2);
    }

    #[tokio::test]
    async fn test_scrape_shape_mismatch_aborts() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("Fixture", temp.path()).await;
        std::fs::write(
            temp.path().join(format!("{}.json", ctx.source.id)),
            r#"{"1.8": [{"group": "1.8", "v": 3}]}"#,
        )
        .unwrap();

        let platform = FixturePlatform {
            ctx,
            remote: Some(FetchResult::List(vec![json!({"group": "1.16", "v": 1})])),
        };
        assert!(matches!(scrape(&platform).await, Err(AppError::InvalidShape)));
    }

    #[tokio::test]
    async fn test_jenkins_fan_out_respects_concurrency() {
        let temp = TempDir::new().unwrap();
        let info = json!({"mcpe_version": "1.16.200", "pm_version": "3.17.0"});
        let (_db, mut ctx, gauge) = gauged_context("Jenkins", temp.path(), 3, info).await;
        ctx.settings.insert("buildInfo", json!(true));
        let platform = JenkinsPlatform::new(ctx).unwrap();

        let builds: Vec<Value> = (1..=12)
            .map(|n| {
                json!({
                    "number": n,
                    "result": "SUCCESS",
                    "url": format!("https://jenkins.pmmp.io/job/PocketMine-MP/{}/", n),
                    "artifacts": [
                        {"fileName": "PocketMine-MP.phar", "relativePath": "PocketMine-MP.phar"}
                    ],
                })
            })
            .collect();
        let output = platform.process(Some(FetchResult::List(builds))).await.unwrap();

        assert_eq!(output.packages["1.16.200"].versions.len(), 12);
        assert_eq!(gauge.lookups.load(Ordering::SeqCst), 12);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {} exceeds the cap", peak);
        assert!(peak > 1, "lookups never overlapped");
    }

    #[tokio::test]
    async fn test_minecraft_java_fan_out_respects_concurrency() {
        let temp = TempDir::new().unwrap();
        let manifest = json!({"downloads": {"server": {"url": "https://x/server.jar"}}});
        let (_db, ctx, gauge) = gauged_context("MinecraftJava", temp.path(), 2, manifest).await;
        let platform = MinecraftJavaPlatform::new(ctx);

        let entries: Vec<Value> = (0..10)
            .map(|n| {
                json!({
                    "id": format!("1.16.{}", n),
                    "type": "release",
                    "url": format!("https://x/1.16.{}.json", n),
                })
            })
            .collect();
        let output = platform.process(Some(FetchResult::List(entries))).await.unwrap();

        assert_eq!(output.packages["release"].versions.len(), 10);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak {} exceeds the cap", peak);
        assert!(peak > 1, "lookups never overlapped");
    }

    #[tokio::test]
    async fn test_request_delay_applies_per_request() {
        let temp = TempDir::new().unwrap();
        let (db, graph) = seeded("Fixture").await;
        let store = Arc::new(db);
        let deps = PlatformDeps {
            client: reqwest::Client::new(),
            cache: CacheService::new(store.clone()),
            store,
            seeds: SeedStore::new(temp.path()),
            concurrency: 1,
            request_delay: Duration::from_millis(20),
        };
        let ctx = PlatformContext::new(graph, &deps);

        let started = tokio::time::Instant::now();
        ctx.throttle().await;
        ctx.throttle().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_scrape_with_nothing_fetched() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("Fixture", temp.path()).await;
        let platform = FixturePlatform { ctx, remote: None };

        let output = scrape(&platform).await.unwrap();
        assert!(output.packages.is_empty());
        assert!(FetchResult::<Value>::List(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_find_game_version_is_cached() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("Fixture", temp.path()).await;

        let first = ctx.find_game_version("1.16.5").await.unwrap();
        let second = ctx.find_game_version("1.16.5").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_registry_unknown_platform() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("Technic", temp.path()).await;

        let registry = PlatformRegistry::default();
        assert!(!registry.contains("Technic"));
        assert_eq!(
            registry.names(),
            vec![
                "Curse",
                "GitHub",
                "Jenkins",
                "MinecraftBedrock",
                "MinecraftJava",
                "Paper",
                "Spigot"
            ]
        );
        assert!(registry.build(ctx).is_err());
    }
}
