//! Spigot and CraftBukkit builds from the SpigotMC hub.

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Value, json};

use crate::error::Result;
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};
use crate::utils::{as_directory, compare_versions};

const HUB_URL: &str = "https://hub.spigotmc.org/";

static BUILD_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\.json$").expect("invalid regex"));

pub struct SpigotPlatform {
    ctx: PlatformContext,
    project: String,
}

impl SpigotPlatform {
    pub fn new(ctx: PlatformContext) -> Self {
        let project = ctx
            .settings
            .get_string("project")
            .unwrap_or_else(|| "spigot".to_string());
        Self { ctx, project }
    }

    fn versions_url(&self) -> String {
        as_directory(&self.ctx.source.url)
    }

    fn stash_url(&self) -> String {
        format!(
            "{}stash/projects/{}/repos/builddata/",
            HUB_URL,
            self.project.to_uppercase()
        )
    }

    /// Build numbers linked from the index page, ascending.
    fn parse_build_index(document: &Html) -> Vec<u64> {
        let Ok(selector) = Selector::parse("pre a") else {
            return Vec::new();
        };

        let mut builds: Vec<u64> = document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| BUILD_FILE.captures(href))
            .filter_map(|caps| caps[1].parse().ok())
            .collect();
        builds.sort_unstable();
        builds.dedup();
        builds
    }

    /// Minecraft version of a build that is already persisted.
    fn known_build(&self, number: u64) -> Option<String> {
        let name = number.to_string();
        self.ctx
            .packages
            .iter()
            .find(|p| p.versions.iter().any(|v| v.version == name))
            .map(|p| p.slug.clone())
    }

    /// Resolve one build to `{name, minecraftVersion}`.
    ///
    /// Builds without BuildData, or whose BuildData cannot be read, are
    /// skipped.
    async fn build_item(&self, number: u64) -> Result<Option<Value>> {
        if let Some(minecraft_version) = self.known_build(number) {
            return Ok(Some(json!({
                "name": number.to_string(),
                "minecraftVersion": minecraft_version,
            })));
        }

        let build: Value = self
            .ctx
            .cached_json(
                &format!("build_{}", number),
                &format!("{}{}.json", self.versions_url(), number),
            )
            .await?;
        let Some(hash) = build.pointer("/refs/BuildData").and_then(Value::as_str) else {
            return Ok(None);
        };

        let url = format!("{}raw/info.json?at={}", self.stash_url(), hash);
        let data: Value = match self
            .ctx
            .cached_json(&format!("build_data_{}", hash), &url)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                log::debug!("[{}] No build data for #{}: {}", self.ctx.name(), number, e);
                return Ok(None);
            }
        };

        Ok(data
            .get("minecraftVersion")
            .and_then(Value::as_str)
            .map(|mc| {
                json!({
                    "name": number.to_string(),
                    "minecraftVersion": mc,
                })
            }))
    }
}

#[async_trait]
impl Platform for SpigotPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        log::info!("[{}] Fetching build list from Spigot Hub", self.ctx.name());
        let builds = {
            let index = self.ctx.get_html(&self.versions_url()).await?;
            Self::parse_build_index(&index)
        };
        log::debug!("[{}] Found {} builds", self.ctx.name(), builds.len());

        let results: Vec<_> = stream::iter(builds)
            .map(|number| async move { (number, self.build_item(number).await) })
            .buffered(self.ctx.concurrency)
            .collect()
            .await;

        let mut items = Vec::new();
        for (number, result) in results {
            match result {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => log::warn!(
                    "[{}] Failed to fetch build #{}: {}",
                    self.ctx.name(),
                    number,
                    e
                ),
            }
        }
        Ok(Some(FetchResult::List(items)))
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        for item in items {
            let name = match &item["name"] {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => {
                    log::warn!("[{}] Skipping build without name: {}", self.ctx.name(), item);
                    continue;
                }
            };
            let Some(minecraft_version) = item["minecraftVersion"].as_str() else {
                log::warn!(
                    "[{}] Skipping build #{} without Minecraft version",
                    self.ctx.name(),
                    name
                );
                continue;
            };

            let game_version = match self.ctx.find_game_version(minecraft_version).await {
                Ok(gv) => gv,
                Err(e) => {
                    log::warn!("[{}] Skipping build #{}: {}", self.ctx.name(), name, e);
                    continue;
                }
            };

            let origin = format!("{}{}.json", self.versions_url(), name);
            packages
                .entry(minecraft_version.to_string())
                .or_insert_with(|| {
                    PackageDraft::new(
                        format!("{} {}", self.ctx.name(), minecraft_version),
                        minecraft_version,
                        minecraft_version,
                    )
                })
                .versions
                .push(VersionRecord::new(
                    &name,
                    format!("#{}", name),
                    game_version.id,
                    Origin::Resolved(origin),
                ));
        }

        for package in packages.values_mut() {
            package.version = package
                .versions
                .iter()
                .map(|v| v.version.as_str())
                .max_by(|a, b| compare_versions(a, b))
                .map(str::to_string);
        }

        Ok(ScrapeOutput::from_packages(packages))
    }
}
