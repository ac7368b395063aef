//! GitHub release feeds.
//!
//! Source config:
//! - `repoOwner`, `repoName`: the repository; taken from the source URL when
//!   it points at `github.com/{owner}/{repo}`
//! - `assetRegex`: picks the release asset; a named group `version` yields
//!   the game version (default: first asset)
//! - `gameVersion`: fixed game version when the asset name carries none
//! - `prereleases`: also build prereleases

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};

const API_URL: &str = "https://api.github.com/";
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 20;

static REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com/(?<owner>[^/]+)/(?<repo>[^/]+?)(?:\.git)?/?$")
        .expect("invalid regex")
});

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

pub struct GitHubPlatform {
    ctx: PlatformContext,
    owner: String,
    repo: String,
    asset_regex: Option<Regex>,
    game_version: Option<String>,
    prereleases: bool,
}

impl GitHubPlatform {
    pub fn new(ctx: PlatformContext) -> Result<Self> {
        let from_url = REPO_URL
            .captures(&ctx.source.url)
            .map(|caps| (caps["owner"].to_string(), caps["repo"].to_string()));

        let configured = ctx
            .settings
            .get_string("repoOwner")
            .zip(ctx.settings.get_string("repoName"));
        let Some((owner, repo)) = configured.or(from_url) else {
            return Err(AppError::platform(
                &ctx.source.slug,
                "set repoOwner and repoName, or point the source URL at the repository",
            ));
        };

        let asset_regex = match ctx.settings.get_string("assetRegex") {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|e| {
                AppError::platform(&ctx.source.slug, format!("invalid assetRegex: {}", e))
            })?),
            None => None,
        };
        let game_version = ctx.settings.get_string("gameVersion");
        let prereleases = ctx.settings.get("prereleases").unwrap_or(false);

        Ok(Self {
            ctx,
            owner,
            repo,
            asset_regex,
            game_version,
            prereleases,
        })
    }

    fn releases_url(&self, page: usize) -> String {
        format!(
            "{}repos/{}/{}/releases?per_page={}&page={}",
            API_URL, self.owner, self.repo, PER_PAGE, page
        )
    }

    /// The asset to build and the game version it targets.
    fn pick_asset<'a>(&self, release: &'a Release) -> Option<(&'a Asset, Option<String>)> {
        match &self.asset_regex {
            Some(regex) => release.assets.iter().find_map(|asset| {
                regex.captures(&asset.name).map(|caps| {
                    let version = caps.name("version").map(|m| m.as_str().to_string());
                    (asset, version)
                })
            }),
            None => release.assets.first().map(|asset| (asset, None)),
        }
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    /// Every release, newest first, one page at a time.
    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        log::info!(
            "[{}] Fetching releases of {}/{}",
            self.ctx.name(),
            self.owner,
            self.repo
        );

        let mut releases = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<Value> = self.ctx.get_json(&self.releases_url(page)).await?;
            let last = batch.len() < PER_PAGE;
            releases.extend(batch);
            if last {
                break;
            }
        }
        log::debug!("[{}] Found {} releases", self.ctx.name(), releases.len());
        Ok(Some(FetchResult::List(releases)))
    }

    /// Published releases, and prereleases only when enabled.
    fn filter(&self, item: &Value) -> bool {
        let flag = |key: &str| item.get(key).and_then(Value::as_bool).unwrap_or(false);
        !flag("draft") && (self.prereleases || !flag("prerelease"))
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        // Oldest first, so the last stable release becomes the pointer
        for item in items.into_iter().rev() {
            let release: Release = match serde_json::from_value(item) {
                Ok(release) => release,
                Err(e) => {
                    log::warn!("[{}] Skipping malformed release: {}", self.ctx.name(), e);
                    continue;
                }
            };

            let Some((asset, captured)) = self.pick_asset(&release) else {
                log::debug!(
                    "[{}] Release {} has no matching asset",
                    self.ctx.name(),
                    release.tag_name
                );
                continue;
            };
            let Some(game_version) = captured.or_else(|| self.game_version.clone()) else {
                log::warn!(
                    "[{}] Release {} has no game version",
                    self.ctx.name(),
                    release.tag_name
                );
                continue;
            };
            let gv = self.ctx.find_game_version(&game_version).await?;

            let label = release
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(&release.tag_name)
                .to_string();
            let record = VersionRecord::new(
                &release.tag_name,
                label,
                gv.id,
                Origin::resolved(&asset.browser_download_url),
            )
            .with_created_at(release.published_at);

            let package = packages.entry(game_version.clone()).or_insert_with(|| {
                PackageDraft::new(
                    format!("{} {}", self.ctx.name(), game_version),
                    &game_version,
                    &game_version,
                )
            });
            if !release.prerelease {
                package.version = Some(release.tag_name.clone());
            }
            package.versions.push(record);
        }

        Ok(ScrapeOutput::from_packages(packages))
    }
}
