//! PaperMC builds from the downloads API.
//!
//! The project document lists every game version; builds are then fetched
//! per version and returned keyed by game version.
//!
//! Source config:
//! - `project`: API project id (default `paper`)
//! - `ignoredVersions`: game versions not to build
//! - `experimental`: also build experimental-channel builds

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};
use crate::utils::as_directory;

#[derive(Debug, Deserialize)]
struct Project {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Build {
    build: u64,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    downloads: IndexMap<String, Download>,
}

#[derive(Debug, Deserialize)]
struct Download {
    name: String,
}

pub struct PaperPlatform {
    ctx: PlatformContext,
    project: String,
    ignored: Vec<String>,
    experimental: bool,
}

impl PaperPlatform {
    pub fn new(ctx: PlatformContext) -> Self {
        let project = ctx
            .settings
            .get_string("project")
            .unwrap_or_else(|| "paper".to_string());
        let ignored = ctx.settings.get("ignoredVersions").unwrap_or_default();
        let experimental = ctx.settings.get("experimental").unwrap_or(false);
        Self {
            ctx,
            project,
            ignored,
            experimental,
        }
    }

    fn project_url(&self) -> String {
        format!(
            "{}projects/{}",
            as_directory(&self.ctx.source.url),
            self.project
        )
    }

    fn builds_url(&self, version: &str) -> String {
        format!("{}/versions/{}/builds", self.project_url(), version)
    }

    fn download_url(&self, version: &str, build: u64, file: &str) -> String {
        format!(
            "{}/versions/{}/builds/{}/downloads/{}",
            self.project_url(),
            version,
            build,
            file
        )
    }

    fn wanted_versions(&self, versions: Vec<String>) -> Vec<String> {
        versions
            .into_iter()
            .filter(|v| !self.ignored.contains(v))
            .collect()
    }

    /// Version record for one build, unless it is filtered out.
    fn build_version(
        &self,
        game_version: &str,
        gv_id: i64,
        build: Build,
    ) -> Option<VersionRecord> {
        let channel = build.channel.as_deref().unwrap_or("default");
        if channel.eq_ignore_ascii_case("experimental") && !self.experimental {
            return None;
        }
        let Some(download) = build.downloads.get("application") else {
            log::debug!(
                "[{}] Build {} #{} has no server download",
                self.ctx.name(),
                game_version,
                build.build
            );
            return None;
        };

        let origin = self.download_url(game_version, build.build, &download.name);
        let record = VersionRecord::new(
            build.build.to_string(),
            format!("{} #{}", game_version, build.build),
            gv_id,
            Origin::Resolved(origin),
        )
        .with_created_at(build.time);
        Some(record)
    }
}

#[async_trait]
impl Platform for PaperPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        log::info!("[{}] Fetching {} versions", self.ctx.name(), self.project);
        let project: Project = self.ctx.get_json(&self.project_url()).await?;
        let versions = self.wanted_versions(project.versions);
        log::debug!("[{}] Found {} versions", self.ctx.name(), versions.len());

        let results: Vec<_> = stream::iter(versions)
            .map(|version| async move {
                let builds: Result<Value> = self.ctx.get_json(&self.builds_url(&version)).await;
                (version, builds)
            })
            .buffered(self.ctx.concurrency)
            .collect()
            .await;

        let mut keyed = IndexMap::new();
        for (version, result) in results {
            match result {
                Ok(doc) => {
                    let builds = doc
                        .get("builds")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    keyed.insert(version, builds);
                }
                Err(e) => log::warn!(
                    "[{}] Failed to fetch builds for {}: {}",
                    self.ctx.name(),
                    version,
                    e
                ),
            }
        }
        Ok(Some(FetchResult::Keyed(keyed)))
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let keyed = match data {
            Some(FetchResult::Keyed(map)) => map,
            Some(FetchResult::List(_)) => return Err(AppError::InvalidShape),
            None => IndexMap::new(),
        };

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        for (game_version, items) in keyed {
            if self.ignored.contains(&game_version) {
                continue;
            }
            let gv = self.ctx.find_game_version(&game_version).await?;

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
            builds.sort_by_key(|b| b.build);

            let mut draft = PackageDraft::new(
                format!("{} {}", self.ctx.name(), game_version),
                &game_version,
                format!("{}-{}", self.project, game_version),
            );
            draft.metadata.insert("mcversion".into(), game_version.clone());
            for build in builds {
                if let Some(record) = self.build_version(&game_version, gv.id, build) {
                    draft.version = Some(record.version.clone());
                    draft.versions.push(record);
                }
            }

            if !draft.versions.is_empty() {
                packages.insert(game_version, draft);
            }
        }

        Ok(ScrapeOutput::from_packages(packages))
    }
}
