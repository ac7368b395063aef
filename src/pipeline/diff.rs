//! Change detection between persisted and freshly scraped packages.
//!
//! Yields the version keys that need a build: versions never seen before,
//! versions whose comparable fields changed, and a newly recommended version.

use indexmap::IndexSet;

use crate::models::{Origin, PackageDraft, StoredPackage, VersionRecord};

/// Detector for version-level changes of one package.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    /// Whether a moved recommended pointer forces a rebuild
    promote_recommended: bool,
}

impl ChangeDetector {
    /// Create a detector with recommended-version promotion enabled.
    pub fn new() -> Self {
        Self {
            promote_recommended: true,
        }
    }

    /// Create a detector that only reports new and changed versions.
    pub fn versions_only() -> Self {
        Self {
            promote_recommended: false,
        }
    }

    /// Version keys of `new` to enqueue, in order of first appearance.
    ///
    /// `old` is the prior persisted package, or `None` on first observation.
    pub fn detect(&self, old: Option<&StoredPackage>, new: &PackageDraft) -> Vec<String> {
        let previous = old.map(|p| p.versions.keyed()).unwrap_or_default();
        let mut changed: IndexSet<String> = IndexSet::new();

        for (key, version) in new.versions.keyed() {
            match previous.get(&key) {
                None => {
                    log::debug!("New version {} of {}", key, new.slug);
                    changed.insert(key);
                }
                Some(prior) if has_changed(prior, version) => {
                    log::debug!("Changed version {} of {}", key, new.slug);
                    changed.insert(key);
                }
                Some(_) => {}
            }
        }

        if self.promote_recommended {
            let old_pointer = old.and_then(|p| p.version.as_deref());
            match new.version.as_deref() {
                Some(pointer) if old_pointer != Some(pointer) => {
                    log::debug!("Recommended version of {} is now {}", new.slug, pointer);
                    changed.insert(pointer.to_string());
                }
                _ => {}
            }
        }

        changed.into_iter().collect()
    }
}

/// Compare every field both sides carry.
///
/// `created_at` only counts when the new record supplies one, at second
/// precision. A deferred origin never counts.
fn has_changed(old: &VersionRecord, new: &VersionRecord) -> bool {
    if old.name != new.name
        || old.game_version_id != new.game_version_id
        || old.active != new.active
    {
        return true;
    }

    let created_moved = new
        .created_at
        .is_some_and(|at| old.created_at.map(|t| t.timestamp()) != Some(at.timestamp()));
    if created_moved {
        return true;
    }

    match (&new.origin, &old.origin) {
        (Some(Origin::Resolved(url)), Some(Origin::Resolved(prior))) => url != prior,
        (Some(Origin::Resolved(_)), _) => true,
        _ => false,
    }
}

/// Convenience function to detect changes with the default detector.
pub fn detect_changes(old: Option<&StoredPackage>, new: &PackageDraft) -> Vec<String> {
    ChangeDetector::new().detect(old, new)
}
