//! Game, game version and source records.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::StoredPackage;

/// A top-level product whose servers are published by sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Game {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub active: bool,
}

/// One upstream version identifier of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameVersion {
    pub id: i64,
    pub game_id: i64,
    pub version: String,
}

/// A configured publisher integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub game_id: i64,
    /// Registry key of the adapter
    pub platform: String,
    pub slug: String,
    pub name: String,
    pub url: String,
    /// Artifact kind (`jar`, `phar`, `zip`, ...)
    pub package_type: String,
    pub active: bool,
}

/// A raw `source_config` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceConfigEntry {
    pub key: String,
    pub value: String,
}

/// Source configuration merged into an adapter at construction.
///
/// Values that parse as JSON are stored parsed; anything else is kept as a string.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    values: HashMap<String, Value>,
}

impl SourceSettings {
    pub fn from_entries(entries: &[SourceConfigEntry]) -> Self {
        let values = entries
            .iter()
            .map(|entry| {
                let value = serde_json::from_str(&entry.value)
                    .unwrap_or_else(|_| Value::String(entry.value.clone()));
                (entry.key.clone(), value)
            })
            .collect();
        Self { values }
    }

    /// Typed lookup; a value of the wrong shape is treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("Ignoring source config '{}': {}", key, e);
                None
            }
        }
    }

    /// String lookup that also accepts scalar JSON values.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }
}

/// A source with everything a pass needs, loaded eagerly at startup.
#[derive(Debug, Clone)]
pub struct SourceGraph {
    pub source: Source,
    pub game: Game,
    pub config: Vec<SourceConfigEntry>,
    /// Prior packages and their versions, as persisted before this run
    pub packages: Vec<StoredPackage>,
}

impl SourceGraph {
    pub fn settings(&self) -> SourceSettings {
        SourceSettings::from_entries(&self.config)
    }
}
