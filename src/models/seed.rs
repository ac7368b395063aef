//! Seed data model structures (games, sources and their config).

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root seed data structure: everything needed to populate a fresh store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    /// Games the sources publish servers for
    pub games: Vec<GameSeed>,

    /// Publisher integrations
    #[serde(default)]
    pub sources: Vec<SourceSeed>,
}

impl Seed {
    /// Load seed data from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate that every source references a seeded game and has a unique slug.
    pub fn validate(&self) -> Result<()> {
        if self.games.is_empty() {
            return Err(AppError::validation("No games defined in seed data"));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !self.games.iter().any(|g| g.slug == source.game) {
                return Err(AppError::validation(format!(
                    "Source '{}' references unknown game '{}'",
                    source.slug, source.game
                )));
            }
            if !seen.insert(source.slug.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate source slug '{}'",
                    source.slug
                )));
            }
        }
        Ok(())
    }
}

/// Game definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSeed {
    pub slug: String,
    pub name: String,
}

/// Source definition with its adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSeed {
    /// Slug of the owning game
    pub game: String,
    pub slug: String,
    pub name: String,
    /// Adapter registry key (e.g., "MinecraftJava")
    pub platform: String,
    pub url: String,
    #[serde(default = "default_package_type")]
    pub package_type: String,
    #[serde(default = "default_active")]
    pub active: bool,

    /// Adapter settings, stored as `source_config` rows
    #[serde(default)]
    pub config: IndexMap<String, toml::Value>,
}

impl SourceSeed {
    /// Config values in their stored text form.
    ///
    /// Strings are stored verbatim unless they would read back as another
    /// JSON type (`"1.10"`, `"true"`); everything else is stored as JSON.
    pub fn config_entries(&self) -> Result<Vec<(String, String)>> {
        self.config
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    toml::Value::String(s)
                        if serde_json::from_str::<serde_json::Value>(s).is_err() =>
                    {
                        s.clone()
                    }
                    other => serde_json::to_string(other)?,
                };
                Ok((key.clone(), text))
            })
            .collect()
    }
}

fn default_package_type() -> String {
    "jar".into()
}

fn default_active() -> bool {
    true
}
