//! Jenkins CI jobs publishing server artifacts (BungeeCord, PocketMine-MP, ...).
//!
//! Source config:
//! - `artifactRegex`: picks the artifact; a named group `version` yields the game version
//! - `gameVersion`: fixed game version when the artifact name carries none
//! - `buildInfo`: read `artifact/build_info.json` for `mcpe_version` and `pm_version`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};
use crate::utils::{as_directory, resolve};

const TREE: &str = "builds[number,result,url,timestamp,artifacts[fileName,relativePath]]";

#[derive(Debug, Clone, Deserialize)]
struct Build {
    number: u64,
    url: String,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    file_name: String,
    relative_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BuildInfo {
    #[serde(default)]
    mcpe_version: Option<String>,
    #[serde(default)]
    pm_version: Option<String>,
    #[serde(default)]
    base_version: Option<String>,
}

pub struct JenkinsPlatform {
    ctx: PlatformContext,
    artifact_regex: Regex,
    game_version: Option<String>,
    build_info: bool,
}

impl JenkinsPlatform {
    pub fn new(ctx: PlatformContext) -> Result<Self> {
        let pattern = ctx
            .settings
            .get_string("artifactRegex")
            .unwrap_or_else(|| ".+".to_string());
        let artifact_regex = Regex::new(&pattern).map_err(|e| {
            AppError::platform(&ctx.source.slug, format!("invalid artifactRegex: {}", e))
        })?;
        let game_version = ctx.settings.get_string("gameVersion");
        let build_info = ctx.settings.get("buildInfo").unwrap_or(false);

        Ok(Self {
            ctx,
            artifact_regex,
            game_version,
            build_info,
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}api/json?tree={}",
            as_directory(&self.ctx.source.url),
            TREE
        )
    }

    async fn fetch_build_info(&self, build: &Build) -> Result<BuildInfo> {
        let url = format!("{}artifact/build_info.json", as_directory(&build.url));
        self.ctx
            .cached_json(&format!("build_{}", build.number), &url)
            .await
    }

    /// Game version and version record for one build, if it has a matching artifact.
    async fn resolve_build(&self, build: &Build) -> Result<Option<(String, VersionRecord)>> {
        let Some((artifact, captured)) = build.artifacts.iter().find_map(|a| {
            self.artifact_regex.captures(&a.file_name).map(|caps| {
                let version = caps.name("version").map(|m| m.as_str().to_string());
                (a, version)
            })
        }) else {
            log::debug!("[{}] Build #{} has no matching artifact", self.ctx.name(), build.number);
            return Ok(None);
        };

        let mut label = format!("{} #{}", self.ctx.name(), build.number);
        let mut game_version = captured.or_else(|| self.game_version.clone());

        if self.build_info {
            let info = self.fetch_build_info(build).await?;
            if let Some(version) = info.pm_version.or(info.base_version) {
                label = format!("{} {} #{}", self.ctx.name(), version, build.number);
            }
            game_version = info.mcpe_version.or(game_version);
        }

        let Some(game_version) = game_version else {
            log::warn!("[{}] Build #{} has no game version", self.ctx.name(), build.number);
            return Ok(None);
        };
        let gv = self.ctx.find_game_version(&game_version).await?;

        let relative = format!("artifact/{}", artifact.relative_path);
        let origin = resolve(&as_directory(&build.url), &relative)
            .unwrap_or_else(|| format!("{}{}", as_directory(&build.url), relative));

        let created_at = build
            .timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let record = VersionRecord::new(
            build.number.to_string(),
            label,
            gv.id,
            Origin::Resolved(origin),
        )
        .with_created_at(created_at);
        Ok(Some((game_version, record)))
    }
}

#[async_trait]
impl Platform for JenkinsPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        log::info!("[{}] Fetching build list from Jenkins", self.ctx.name());
        let project: Value = self.ctx.get_json(&self.api_url()).await?;
        let builds = project
            .get("builds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        log::debug!("[{}] Found {} builds", self.ctx.name(), builds.len());
        Ok(Some(FetchResult::List(builds)))
    }

    /// Successful builds only.
    fn filter(&self, item: &Value) -> bool {
        item.get("result").and_then(Value::as_str) == Some("SUCCESS")
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };

        let mut builds: Vec<Build> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(build) => Some(build),
                Err(e) => {
                    log::warn!("[{}] Skipping malformed build: {}", self.ctx.name(), e);
                    None
                }
            })
            .collect();
        builds.sort_by_key(|b| b.number);

        let results: Vec<_> = stream::iter(builds)
            .map(|build| async move {
                let result = self.resolve_build(&build).await;
                (build.number, result)
            })
            .buffered(self.ctx.concurrency)
            .collect()
            .await;

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        for (number, result) in results {
            let (game_version, record) = match result {
                Ok(Some(resolved)) => resolved,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[{}] Skipping build #{}: {}", self.ctx.name(), number, e);
                    continue;
                }
            };

            let package = packages.entry(game_version.clone()).or_insert_with(|| {
                let mut draft = PackageDraft::new(
                    format!("{} {}", self.ctx.name(), game_version),
                    &game_version,
                    &game_version,
                );
                draft.metadata.insert("mcversion".into(), game_version.clone());
                draft
            });
            // Builds are ascending, so the last one is the newest
            package.version = Some(record.version.clone());
            package.versions.push(record);
        }

        Ok(ScrapeOutput::from_packages(packages))
    }
}
