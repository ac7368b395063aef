//! Official Minecraft: Java Edition server releases.
//!
//! Reads the launcher version manifest, groups versions by channel and
//! looks up each version's server download in its per-version manifest.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};

/// Ancient versions whose manifests carry no server download.
static SKIP_MANIFEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(a|b|c|rd-|inf)").expect("invalid regex"));
static PRE_RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i) Pre-Release ").expect("invalid regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s").expect("invalid regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    id: String,
    #[serde(rename = "type")]
    channel: String,
    url: String,
    #[serde(default)]
    release_time: Option<DateTime<Utc>>,
}

pub struct MinecraftJavaPlatform {
    ctx: PlatformContext,
    ignored_packages: Vec<String>,
    ignored_versions: HashMap<String, Vec<String>>,
    /// Channel to newest version id, from the last manifest fetch
    latest: Mutex<HashMap<String, String>>,
}

impl MinecraftJavaPlatform {
    pub fn new(ctx: PlatformContext) -> Self {
        let ignored_packages = ctx.settings.get("ignoredPackages").unwrap_or_default();
        let ignored_versions = ctx.settings.get("ignoredVersions").unwrap_or_default();
        Self {
            ctx,
            ignored_packages,
            ignored_versions,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot ids like `1.14 Pre-Release 1` become `1.14-pre1`.
    fn fix_version(id: &str) -> String {
        let id = PRE_RELEASE.replace_all(id, "-pre");
        WHITESPACE.replace_all(&id, "-").into_owned()
    }

    /// `release` is "Minecraft", `snapshot` is "Minecraft Snapshot".
    fn channel_name(channel: &str) -> String {
        let raw = channel.replace("release", "");
        let mut chars = raw.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        format!("Minecraft {}", capitalized).trim().to_string()
    }

    fn is_ignored(&self, entry: &ManifestEntry) -> bool {
        self.ignored_packages.contains(&entry.channel)
            || self
                .ignored_versions
                .get(&entry.channel)
                .is_some_and(|ids| ids.contains(&entry.id))
    }

    /// A prior record for this version that already has an origin.
    fn known_version(&self, entry: &ManifestEntry) -> Option<VersionRecord> {
        self.ctx
            .packages
            .iter()
            .filter(|p| p.slug == entry.channel)
            .flat_map(|p| p.versions.iter())
            .find(|v| {
                v.version == entry.id
                    && v.origin.as_ref().and_then(Origin::as_resolved).is_some()
            })
            .cloned()
    }

    async fn server_url(&self, entry: &ManifestEntry) -> Result<Option<String>> {
        if SKIP_MANIFEST.is_match(&entry.id) {
            log::debug!("Skipping manifest for version: {}", entry.id);
            return Ok(None);
        }

        let manifest: Value = self
            .ctx
            .cached_json(&format!("manifest_{}", entry.id), &entry.url)
            .await?;
        Ok(manifest
            .pointer("/downloads/server/url")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn build_version(&self, entry: &ManifestEntry) -> Result<VersionRecord> {
        if let Some(known) = self.known_version(entry) {
            return Ok(known);
        }

        let game_version = self.ctx.find_game_version(&entry.id).await?;
        let record = match self.server_url(entry).await? {
            Some(url) => {
                VersionRecord::new(&entry.id, &entry.id, game_version.id, Origin::Resolved(url))
            }
            None => VersionRecord::new(
                &entry.id,
                &entry.id,
                game_version.id,
                Origin::resolved(&entry.url),
            )
            .inactive(),
        };
        Ok(record.with_created_at(entry.release_time))
    }
}

#[async_trait]
impl Platform for MinecraftJavaPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        let manifest: Value = self.ctx.get_json(&self.ctx.source.url).await?;

        if let Some(latest) = manifest.get("latest").and_then(Value::as_object) {
            let mut pointers = self.latest.lock().await;
            for (channel, id) in latest {
                if let Some(id) = id.as_str() {
                    pointers.insert(channel.clone(), id.to_string());
                }
            }
        }

        let versions = manifest
            .get("versions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(Some(FetchResult::List(versions)))
    }

    fn filter(&self, item: &Value) -> bool {
        match item.get("type").and_then(Value::as_str) {
            Some(channel) => !self.ignored_packages.iter().any(|c| c == channel),
            None => true,
        }
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<ManifestEntry>(item) {
                Ok(mut entry) => {
                    if entry.channel == "snapshot" {
                        entry.id = Self::fix_version(&entry.id);
                    }
                    if !self.is_ignored(&entry) {
                        entries.push(entry);
                    }
                }
                Err(e) => log::warn!(
                    "[{}] Skipping malformed manifest entry: {}",
                    self.ctx.name(),
                    e
                ),
            }
        }

        let results: Vec<_> = stream::iter(entries)
            .map(|entry| async move {
                let result = self.build_version(&entry).await;
                (entry, result)
            })
            .buffered(self.ctx.concurrency)
            .collect()
            .await;

        let mut packages: IndexMap<String, PackageDraft> = IndexMap::new();
        for (entry, result) in results {
            let package = packages.entry(entry.channel.clone()).or_insert_with(|| {
                PackageDraft::new(
                    Self::channel_name(&entry.channel),
                    &entry.channel,
                    &entry.channel,
                )
            });
            match result {
                Ok(version) => package.versions.push(version),
                Err(e) => log::warn!("[{}] Skipping version {}: {}", self.ctx.name(), entry.id, e),
            }
        }

        let latest = self.latest.lock().await;
        for (channel, package) in packages.iter_mut() {
            let Some(id) = latest.get(channel) else {
                continue;
            };
            if package.versions.iter().any(|v| &v.version == id) {
                package.version = Some(id.clone());
            }
        }
        drop(latest);

        Ok(ScrapeOutput::from_packages(packages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::tests::test_context;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_fix_version() {
        assert_eq!(MinecraftJavaPlatform::fix_version("1.14 Pre-Release 1"), "1.14-pre1");
        assert_eq!(MinecraftJavaPlatform::fix_version("3D Shareware v1.34"), "3D-Shareware-v1.34");
        assert_eq!(MinecraftJavaPlatform::fix_version("20w14a"), "20w14a");
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(MinecraftJavaPlatform::channel_name("release"), "Minecraft");
        assert_eq!(MinecraftJavaPlatform::channel_name("snapshot"), "Minecraft Snapshot");
        assert_eq!(MinecraftJavaPlatform::channel_name("old_beta"), "Minecraft Old_beta");
    }

    #[tokio::test]
    async fn test_process_uses_cached_manifests() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("MinecraftJava", temp.path()).await;
        ctx.cache
            .put(
                "manifest_1.16.5",
                &json!({
                    "downloads": {"server": {"url": "https://launcher.mojang.com/server.jar"}}
                }),
            )
            .await
            .unwrap();
        ctx.cache
            .put("manifest_1.14-pre1", &json!({"downloads": {}}))
            .await
            .unwrap();

        let platform = MinecraftJavaPlatform::new(ctx);
        platform
            .latest
            .lock()
            .await
            .insert("release".into(), "1.16.5".into());

        let data = FetchResult::List(vec![
            json!({
                "id": "1.16.5",
                "type": "release",
                "url": "https://x/1.16.5.json",
                "releaseTime": "2021-01-14T16:05:32+00:00",
            }),
            json!({"id": "1.14 Pre-Release 1", "type": "snapshot", "url": "https://x/pre.json"}),
            json!({"id": "b1.7.3", "type": "old_beta", "url": "https://x/b1.7.3.json"}),
            json!({"broken": true}),
        ]);
        let output = platform.process(Some(data)).await.unwrap();

        assert_eq!(
            output.packages.keys().collect::<Vec<_>>(),
            vec!["release", "snapshot", "old_beta"]
        );

        let release = &output.packages["release"];
        assert_eq!(release.name, "Minecraft");
        assert_eq!(release.version.as_deref(), Some("1.16.5"));
        let version = release.versions.iter().next().unwrap();
        assert!(version.active);
        assert!(version.created_at.is_some());
        assert_eq!(
            version.origin.as_ref().and_then(Origin::as_resolved),
            Some("https://launcher.mojang.com/server.jar")
        );

        let snapshot = output.packages["snapshot"].versions.iter().next().unwrap();
        assert_eq!(snapshot.version, "1.14-pre1");
        assert!(!snapshot.active);
        assert_eq!(
            snapshot.origin.as_ref().and_then(Origin::as_resolved),
            Some("https://x/pre.json")
        );

        let beta = output.packages["old_beta"].versions.iter().next().unwrap();
        assert!(!beta.active);
    }

    #[tokio::test]
    async fn test_ignored_channels_and_versions() {
        let temp = TempDir::new().unwrap();
        let (_db, mut ctx) = test_context("MinecraftJava", temp.path()).await;
        ctx.settings.insert("ignoredPackages", json!(["old_alpha"]));
        ctx.settings.insert("ignoredVersions", json!({"old_beta": ["b1.7.3"]}));
        let platform = MinecraftJavaPlatform::new(ctx);

        assert!(!platform.filter(&json!({"id": "a1.0.4", "type": "old_alpha"})));
        assert!(platform.filter(&json!({"id": "1.16.5", "type": "release"})));

        let data = FetchResult::List(vec![
            json!({"id": "b1.7.3", "type": "old_beta", "url": "https://x/b1.7.3.json"}),
            json!({"id": "b1.6", "type": "old_beta", "url": "https://x/b1.6.json"}),
        ]);
        let output = platform.process(Some(data)).await.unwrap();
        let versions: Vec<_> = output.packages["old_beta"]
            .versions
            .iter()
            .map(|v| v.version.clone())
            .collect();
        assert_eq!(versions, vec!["b1.6"]);
    }
}
