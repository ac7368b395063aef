//! Minecraft: Bedrock Edition dedicated server.
//!
//! The download page links the current Linux server zip. A local seed
//! document can list older zip URLs to backfill history.

use std::sync::LazyLock;

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Origin, PackageDraft, ScrapeOutput, VersionRecord};
use crate::platforms::{FetchResult, Platform, PlatformContext};
use crate::utils::compare_versions;

const DOWNLOAD_LINK: &str = r#"a[data-platform="serverBedrockLinux"]"#;
const PACKAGE_SLUG: &str = "bedrock";

static SERVER_ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/bin-linux/bedrock-server-(?<version>[0-9.]+)\.zip$")
        .expect("invalid regex")
});

pub struct MinecraftBedrockPlatform {
    ctx: PlatformContext,
}

impl MinecraftBedrockPlatform {
    pub fn new(ctx: PlatformContext) -> Self {
        Self { ctx }
    }

    /// Linux server links on the download page.
    fn parse_download_links(document: &Html) -> Vec<String> {
        let Ok(selector) = Selector::parse(DOWNLOAD_LINK) else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .collect()
    }

    /// Server version carried in a download URL.
    fn server_version(url: &str) -> Option<String> {
        SERVER_ZIP
            .captures(url)
            .map(|caps| caps["version"].to_string())
    }
}

#[async_trait]
impl Platform for MinecraftBedrockPlatform {
    fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    async fn fetch_remote(&self) -> Result<Option<FetchResult>> {
        log::info!("[{}] Fetching download page", self.ctx.name());
        let links = {
            let page = self.ctx.get_html(&self.ctx.source.url).await?;
            Self::parse_download_links(&page)
        };
        if links.is_empty() {
            log::warn!("[{}] No server download link on the page", self.ctx.name());
        }
        Ok(Some(FetchResult::List(
            links.into_iter().map(Value::String).collect(),
        )))
    }

    /// Linux server zips only.
    fn filter(&self, item: &Value) -> bool {
        item.as_str().and_then(Self::server_version).is_some()
    }

    async fn process(&self, data: Option<FetchResult>) -> Result<ScrapeOutput> {
        let items = match data {
            Some(FetchResult::List(items)) => items,
            Some(FetchResult::Keyed(map)) => map.into_values().flatten().collect(),
            None => Vec::new(),
        };

        let mut found: Vec<(String, String)> = Vec::new();
        for item in items {
            let Some(url) = item.as_str() else {
                log::warn!("[{}] Skipping non-string link {}", self.ctx.name(), item);
                continue;
            };
            let Some(version) = Self::server_version(url) else {
                log::warn!("[{}] Invalid server link {}", self.ctx.name(), url);
                continue;
            };
            if !found.iter().any(|(known, _)| *known == version) {
                found.push((version, url.to_string()));
            }
        }
        found.sort_by(|a, b| compare_versions(&a.0, &b.0));

        let mut draft = PackageDraft::new(self.ctx.name(), PACKAGE_SLUG, PACKAGE_SLUG);
        for (version, url) in found {
            let gv = self.ctx.find_game_version(&version).await?;
            draft.version = Some(version.clone());
            draft
                .versions
                .push(VersionRecord::new(&version, &version, gv.id, Origin::Resolved(url)));
        }

        let mut packages = IndexMap::new();
        if !draft.versions.is_empty() {
            packages.insert(PACKAGE_SLUG.to_string(), draft);
        }
        Ok(ScrapeOutput::from_packages(packages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::tests::test_context;
    use serde_json::json;
    use tempfile::TempDir;

    const BIN: &str = "https://www.minecraft.net/bedrockdedicatedserver/bin-linux";

    const PAGE: &str = r#"<html><body>
        <a data-platform="serverBedrockWindows"
           href="https://www.minecraft.net/bedrockdedicatedserver/bin-win/bedrock-server-1.21.2.02.zip">Windows</a>
        <a data-platform="serverBedrockLinux"
           href="https://www.minecraft.net/bedrockdedicatedserver/bin-linux/bedrock-server-1.21.2.02.zip">Linux</a>
    </body></html>"#;

    #[test]
    fn test_parse_download_links() {
        let document = Html::parse_document(PAGE);
        assert_eq!(
            MinecraftBedrockPlatform::parse_download_links(&document),
            vec![format!("{}/bedrock-server-1.21.2.02.zip", BIN)]
        );
    }

    #[test]
    fn test_server_version() {
        let url = format!("{}/bedrock-server-1.16.201.02.zip", BIN);
        assert_eq!(
            MinecraftBedrockPlatform::server_version(&url).as_deref(),
            Some("1.16.201.02")
        );
        let legacy = "https://minecraft.azureedge.net/bin-linux/bedrock-server-1.14.32.1.zip";
        assert_eq!(
            MinecraftBedrockPlatform::server_version(legacy).as_deref(),
            Some("1.14.32.1")
        );
        let windows = "https://x/bin-win/bedrock-server-1.2.3.zip";
        assert!(MinecraftBedrockPlatform::server_version(windows).is_none());
    }

    #[tokio::test]
    async fn test_process_orders_versions_and_points_at_newest() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("MinecraftBedrock", temp.path()).await;
        let platform = MinecraftBedrockPlatform::new(ctx);

        // Page link first, backfilled seed links after, one duplicate
        let data = FetchResult::List(vec![
            json!(format!("{}/bedrock-server-1.16.201.02.zip", BIN)),
            json!(format!("{}/bedrock-server-1.16.100.04.zip", BIN)),
            json!(format!("{}/bedrock-server-1.16.201.02.zip", BIN)),
            json!(42),
        ]);
        let output = platform.process(Some(data)).await.unwrap();

        let package = &output.packages["bedrock"];
        let versions: Vec<_> = package.versions.iter().map(|v| v.version.clone()).collect();
        assert_eq!(versions, vec!["1.16.100.04", "1.16.201.02"]);
        assert_eq!(package.version.as_deref(), Some("1.16.201.02"));

        let newest = package.versions.iter().last().unwrap();
        let expected = format!("{}/bedrock-server-1.16.201.02.zip", BIN);
        assert_eq!(
            newest.origin.as_ref().and_then(Origin::as_resolved),
            Some(expected.as_str())
        );
    }

    #[tokio::test]
    async fn test_filter_and_empty_input() {
        let temp = TempDir::new().unwrap();
        let (_db, ctx) = test_context("MinecraftBedrock", temp.path()).await;
        let platform = MinecraftBedrockPlatform::new(ctx);

        assert!(platform.filter(&json!(format!("{}/bedrock-server-1.2.3.zip", BIN))));
        assert!(!platform.filter(&json!("https://x/bin-win/bedrock-server-1.2.3.zip")));

        let output = platform.process(None).await.unwrap();
        assert!(output.packages.is_empty());
    }
}
