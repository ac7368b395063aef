//! Package and package version records.
//!
//! Adapters produce [`PackageDraft`]s; the repository hands back
//! [`StoredPackage`]s. Both carry their versions as a [`VersionSet`], which
//! may be an ordered list or a map keyed by version identifier.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;

/// A not-yet-evaluated download URL lookup.
#[derive(Clone)]
pub struct Resolver(Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>);

impl Resolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// Run the lookup once.
    pub async fn resolve(&self) -> Result<String> {
        (self.0)().await
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver(..)")
    }
}

/// Where a version's artifact can be downloaded from.
#[derive(Debug, Clone)]
pub enum Origin {
    Resolved(String),
    /// Resolved only when the version is enqueued for building
    Deferred(Resolver),
}

impl Origin {
    pub fn resolved(url: impl Into<String>) -> Self {
        Self::Resolved(url.into())
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::Deferred(Resolver::new(f))
    }

    pub fn as_resolved(&self) -> Option<&str> {
        match self {
            Self::Resolved(url) => Some(url),
            Self::Deferred(_) => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Resolved(url) => serializer.serialize_str(url),
            Self::Deferred(_) => serializer.serialize_none(),
        }
    }
}

/// One concrete buildable artifact of a package.
#[derive(Debug, Clone, Serialize)]
pub struct VersionRecord {
    /// Persisted row id, absent on fresh drafts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub version: String,
    pub name: String,
    pub game_version_id: i64,
    pub origin: Option<Origin>,
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl VersionRecord {
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        game_version_id: i64,
        origin: Origin,
    ) -> Self {
        Self {
            id: None,
            version: version.into(),
            name: name.into(),
            game_version_id,
            origin: Some(origin),
            active: true,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Identity of this version within its package.
    ///
    /// The declared `version` string is authoritative; the row id is only
    /// used for records that carry no version string at all.
    pub fn key(&self) -> String {
        if !self.version.is_empty() {
            return self.version.clone();
        }
        self.id.map(|id| id.to_string()).unwrap_or_default()
    }
}

/// Versions of a package, either listed or keyed by identifier.
#[derive(Debug, Clone)]
pub enum VersionSet {
    List(Vec<VersionRecord>),
    Keyed(IndexMap<String, VersionRecord>),
}

impl Default for VersionSet {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl From<Vec<VersionRecord>> for VersionSet {
    fn from(versions: Vec<VersionRecord>) -> Self {
        Self::List(versions)
    }
}

impl VersionSet {
    /// View as an ordered map, keying list entries by [`VersionRecord::key`].
    ///
    /// A later list entry with a duplicate key replaces the earlier one but
    /// keeps its position.
    pub fn keyed(&self) -> IndexMap<String, &VersionRecord> {
        match self {
            Self::List(list) => list.iter().map(|v| (v.key(), v)).collect(),
            Self::Keyed(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &VersionRecord> + Send + '_> {
        match self {
            Self::List(list) => Box::new(list.iter()),
            Self::Keyed(map) => Box::new(map.values()),
        }
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut VersionRecord> + Send + '_> {
        match self {
            Self::List(list) => Box::new(list.iter_mut()),
            Self::Keyed(map) => Box::new(map.values_mut()),
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut VersionRecord> {
        match self {
            Self::List(list) => list.iter_mut().find(|v| v.key() == key),
            Self::Keyed(map) => map.get_mut(key),
        }
    }

    /// Drop every version whose key is in `keys`.
    pub fn remove_keys(&mut self, keys: &[String]) {
        match self {
            Self::List(list) => list.retain(|v| !keys.contains(&v.key())),
            Self::Keyed(map) => map.retain(|k, _| !keys.contains(k)),
        }
    }

    pub fn push(&mut self, version: VersionRecord) {
        match self {
            Self::List(list) => list.push(version),
            Self::Keyed(map) => {
                map.insert(version.key(), version);
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            Self::Keyed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for VersionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// A package as normalized by an adapter's `process` step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageDraft {
    pub name: String,
    pub slug: String,
    /// The adapter's own identifier for the upstream item
    pub source_ref: String,
    pub versions: VersionSet,
    /// Recommended version pointer
    pub version: Option<String>,
    pub metadata: IndexMap<String, String>,
}

impl PackageDraft {
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            source_ref: source_ref.into(),
            ..Self::default()
        }
    }
}

/// A package as persisted, with its versions.
#[derive(Debug, Clone, Default)]
pub struct StoredPackage {
    pub id: i64,
    pub source_id: i64,
    pub slug: String,
    pub source_ref: String,
    pub name: String,
    pub version: Option<String>,
    pub active: bool,
    /// Unix seconds of the last pass that produced this package
    pub last_seen_at: Option<i64>,
    pub versions: VersionSet,
}

impl StoredPackage {
    /// Whether this row is the persisted counterpart of `draft`.
    ///
    /// Matches on `(slug, source_ref)`; rows written before `source_ref` was
    /// populated fall back to matching by name.
    pub fn matches(&self, draft: &PackageDraft) -> bool {
        if self.source_ref.is_empty() {
            return self.name == draft.name;
        }
        self.slug == draft.slug && self.source_ref == draft.source_ref
    }
}

/// Find the prior persisted package for a draft.
pub fn find_prior<'a>(
    packages: &'a [StoredPackage],
    draft: &PackageDraft,
) -> Option<&'a StoredPackage> {
    packages
        .iter()
        .find(|p| !p.source_ref.is_empty() && p.matches(draft))
        .or_else(|| packages.iter().find(|p| p.matches(draft)))
}

/// Output of an adapter's `process` step.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutput {
    /// Packages keyed by slug
    pub packages: IndexMap<String, PackageDraft>,
    pub meta: Map<String, Value>,
}

impl ScrapeOutput {
    pub fn from_packages(packages: IndexMap<String, PackageDraft>) -> Self {
        Self {
            packages,
            meta: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(slug: &str, source_ref: &str, name: &str) -> StoredPackage {
        StoredPackage {
            id: 1,
            slug: slug.into(),
            source_ref: source_ref.into(),
            name: name.into(),
            ..StoredPackage::default()
        }
    }

    #[test]
    fn test_version_key_prefers_version_string() {
        let mut record = VersionRecord::new("123", "#123", 1, Origin::resolved("u"));
        record.id = Some(9);
        assert_eq!(record.key(), "123");

        record.version.clear();
        assert_eq!(record.key(), "9");
    }

    #[test]
    fn test_keyed_view_of_list() {
        let set = VersionSet::from(vec![
            VersionRecord::new("1.0", "a", 1, Origin::resolved("x")),
            VersionRecord::new("2.0", "b", 1, Origin::resolved("y")),
        ]);
        let keyed = set.keyed();
        assert_eq!(keyed.keys().collect::<Vec<_>>(), vec!["1.0", "2.0"]);
    }

    #[test]
    fn test_remove_keys() {
        let mut set = VersionSet::from(vec![
            VersionRecord::new("1.0", "a", 1, Origin::resolved("x")),
            VersionRecord::new("2.0", "b", 1, Origin::resolved("y")),
        ]);
        set.remove_keys(&["1.0".to_string()]);
        assert_eq!(set.len(), 1);
        assert!(set.get_mut("2.0").is_some());
    }

    #[test]
    fn test_version_iterators_are_send() {
        fn assert_send<T: Send>(_: T) {}

        let mut set = VersionSet::Keyed(IndexMap::from([(
            "1.0".to_string(),
            VersionRecord::new("1.0", "a", 1, Origin::deferred(|| async { Ok("x".into()) })),
        )]));
        assert_send(set.iter());
        assert_send(set.iter_mut());
    }

    #[test]
    fn test_origin_serialization() {
        let resolved = serde_json::to_value(Origin::resolved("https://x/a.jar")).unwrap();
        assert_eq!(resolved, Value::String("https://x/a.jar".into()));

        let deferred = Origin::deferred(|| async { Ok("https://x/b.jar".to_string()) });
        assert_eq!(serde_json::to_value(deferred).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_deferred_origin_resolves_on_demand() {
        let origin = Origin::deferred(|| async { Ok("https://x/c.jar".to_string()) });
        let Origin::Deferred(resolver) = origin else {
            panic!("expected deferred origin");
        };
        assert_eq!(resolver.resolve().await.unwrap(), "https://x/c.jar");
    }

    #[test]
    fn test_find_prior_by_natural_key() {
        let packages = vec![
            stored("1.16", "Paper-1.16", "Paper 1.16"),
            stored("1.17", "Paper-1.17", "Paper 1.17"),
        ];
        let draft = PackageDraft::new("Paper 1.17 renamed", "1.17", "Paper-1.17");
        assert_eq!(find_prior(&packages, &draft).unwrap().slug, "1.17");
    }

    #[test]
    fn test_find_prior_falls_back_to_name() {
        let packages = vec![stored("legacy", "", "Spigot 1.8")];
        let draft = PackageDraft::new("Spigot 1.8", "1.8", "1.8");
        assert!(find_prior(&packages, &draft).is_some());

        let other = PackageDraft::new("Spigot 1.9", "1.9", "1.9");
        assert!(find_prior(&packages, &other).is_none());
    }
}
