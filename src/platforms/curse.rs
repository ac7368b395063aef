//! CurseForge modpacks with downloadable server packs.
//!
//! Download URLs are looked up through a separate endpoint, so every version
//! carries a deferred origin that is resolved only when the version is
//! enqueued for building.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};
use crate::utils::{as_directory, compare_versions, http};

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(?-?v?((?:(?:[Aa]lpha|[Bb]eta)\s*)?\d+(?:\.[\da-zA-Z.-]+)?)\)?$")
        .expect("invalid regex")
});

#[derive(Debug, Clone, Deserialize)]
struct Pack {
    id: u64,
    name: String,
    slug: String,
    #[serde(default)]
    files: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackFile {
    id: u64,
    file_name: String,
    #[serde(default)]
    file_date: Option<DateTime<Utc>>,
    #[serde(default)]
    is_available: bool,
    #[serde(default)]
    server_pack_file_id: Option<u64>,
    #[serde(default)]
    game_version: Vec<String>,
}

pub struct CursePlatform {
    ctx: PlatformContext,
    includes: Vec<u64>,
}

impl CursePlatform {
    pub fn new(ctx: PlatformContext) -> Self {
        let includes = ctx.settings.get("includes").unwrap_or_default();
        Self { ctx, includes }
    }

    fn api_url(&self) -> String {
        as_directory(&self.ctx.source.url)
    }

    /// Version label from a file name, falling back to the file id.
    fn format_version(file_name: &str, id: u64) -> String {
        let stem = file_name
            .strip_suffix(".zip")
            .or_else(|| file_name.strip_suffix(".jar"))
            .unwrap_or(file_name);
        VERSION_REGEX
            .captures(stem)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// The download endpoint answers with a JSON string or plain text.
    fn parse_download_url(body: &str) -> Result<String> {
        let body = body.trim();
        let url = serde_json::from_str::<String>(body).unwrap_or_else(|_| body.to_string());
        if url.is_empty() {
            return Err(AppError::resolve("empty download url"));
        }
        Ok(url)
    }

    fn server_download(&self, pack_id: u64, server_pack_file_id: u64) -> Origin {
        let client = self.ctx.client.clone();
        let url = format!(
            "{}addon/{}/file/{}/download-url",
            self.api_url(),
            pack_id,
            server_pack_file_id
        );
        Origin::deferred(move || {
            let client = client.clone();
            let url = url.clone();
            async move {
                let body = http::get_text(&client, &url).await?;
                Self::parse_download_url(&body)
            }
        })
    }

    async fn with_files(&self, mut pack: Value) -> Result<Option<Value>> {
        let section = pack
            .pointer("/categorySection/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if section != "Modpacks" {
            log::debug!(
                "[{}] {} is not a modpack; skipping",
                self.ctx.name(),
                pack["name"]
            );
            return Ok(None);
        }

        let Some(id) = pack["id"].as_u64() else {
            return Ok(None);
        };
        let files: Value = self
            .ctx
            .get_json(&format!("{}addon/{}/files", self.api_url(), id))
            .await?;
        pack["files"] = files;
        Ok(Some(pack))
    }

    async fn build_version(&self, pack_id: u64, file: PackFile) -> Result<Option<VersionRecord>> {
        let Some(server_pack) = file.server_pack_file_id.filter(|_| file.is_available) else {
            return Ok(None);
        };
        let Some(minecraft_version) = file
            .game_version
            .iter()
            .filter(|v| v.starts_with(|c: char| c.is_ascii_digit()))
            .max_by(|a, b| compare_versions(a, b))
        else {
            log::debug!("[{}] File {} lists no game version", self.ctx.name(), file.id);
            return Ok(None);
        };

        let gv = self.ctx.find_game_version(minecraft_version).await?;
        let record = VersionRecord::new(
            file.id.to_string(),
            Self::format_version(&file.file_name, file.id),
            gv.id,
            self.server_download(pack_id, server_pack),
        )
        .with_created_at(file.file_date);
        Ok(Some(record))
    }
}

#[async_trait]
impl Platform for CursePlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        if self.includes.is_empty() {
            log::warn!("[{}] No addon ids configured in 'includes'", self.ctx.name());
            return Ok(Some(FetchResult::List(Vec::new())));
        }

        log::info!(
            "[{}] Looking up {} addon ids in CurseForge API",
            self.ctx.name(),
            self.includes.len()
        );
        let packs: Vec<Value> =
            http::post_json(&self.ctx.client, &format!("{}addon", self.api_url()), &self.includes)
                .await?;

        let results: Vec<_> = stream::iter(packs)
            .map(|pack| async move {
                let id = pack["id"].clone();
                (id, self.with_files(pack).await)
            })
            .buffer_unordered(self.ctx.concurrency)
            .collect()
            .await;

        let mut items = Vec::new();
        for (id, result) in results {
            match result {
                Ok(Some(pack)) => items.push(pack),
                Ok(None) => {}
                Err(e) => log::warn!(
                    "[{}] Failed to fetch files for {}: {}",
                    self.ctx.name(),
                    id,
                    e
                ),
            }
        }
        // Keep the configured order regardless of completion order
        items.sort_by_key(|pack| {
            let id = pack["id"].as_u64();
            self.includes
                .iter()
                .position(|included| Some(*included) == id)
                .unwrap_or(usize::MAX)
        });
        Ok(Some(FetchResult::List(items)))
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };
        log::debug!("[{}] Processing {} addons", self.ctx.name(), items.len());

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        for item in items {
            let pack: Pack = match serde_json::from_value(item) {
                Ok(pack) => pack,
                Err(e) => {
                    log::warn!("[{}] Skipping malformed addon: {}", self.ctx.name(), e);
                    continue;
                }
            };
            if pack.files.is_empty() {
                log::debug!("[{}] Skipping {} with no files", self.ctx.name(), pack.id);
                continue;
            }

            let mut draft = PackageDraft::new(&pack.name, &pack.slug, pack.id.to_string());
            for raw in pack.files {
                let file: PackFile = match serde_json::from_value(raw) {
                    Ok(file) => file,
                    Err(e) => {
                        log::warn!(
                            "[{}] Skipping malformed file of {}: {}",
                            self.ctx.name(),
                            pack.id,
                            e
                        );
                        continue;
                    }
                };
                let file_id = file.id;
                match self.build_version(pack.id, file).await {
                    Ok(Some(record)) => draft.versions.push(record),
                    Ok(None) => {}
                    Err(e) => log::warn!("[{}] Skipping file {}: {}", self.ctx.name(), file_id, e),
                }
            }

            if !draft.versions.is_empty() {
                packages.insert(pack.slug.clone(), draft);
            }
        }

        Ok(ScrapeOutput::from_packages(packages))
    }
}
