//! Utility functions and helpers.

pub mod http;

use std::cmp::Ordering;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Treat `url` as a directory so relative joins append instead of replacing
/// the last path segment.
pub fn as_directory(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Compare dotted version strings, numeric segments numerically.
///
/// `1.16.10` sorts after `1.16.9`, and `1.16` before `1.16.1`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |s: &str| -> Vec<String> {
        s.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (segments(a), segments(b));

    for (x, y) in left.iter().zip(right.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.16.10", "1.16.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.16", "1.16.1"), Ordering::Less);
        assert_eq!(compare_versions("1.12.2", "1.12.2"), Ordering::Equal);

        let mut versions = vec!["1.7.10", "1.12.2", "1.10"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, vec!["1.7.10", "1.10", "1.12.2"]);
    }

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://hub.spigotmc.org/versions/").unwrap();
        assert_eq!(
            resolve_url(&base, "1234.json"),
            "https://hub.spigotmc.org/versions/1234.json"
        );
        assert_eq!(
            resolve_url(&base, "/stash/"),
            "https://hub.spigotmc.org/stash/"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_resolve_against_file_url() {
        assert_eq!(
            resolve("https://hub.spigotmc.org/versions", "1234.json").as_deref(),
            Some("https://hub.spigotmc.org/1234.json")
        );
        assert_eq!(
            resolve(&as_directory("https://hub.spigotmc.org/versions"), "1234.json").as_deref(),
            Some("https://hub.spigotmc.org/versions/1234.json")
        );
        assert!(resolve("not a url", "x").is_none());
    }
}
