// src/models/mod.rs

//! Domain models for the generator.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod message;
mod package;
mod seed;
mod source;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, DatabaseConfig, NotificationConfig, PathsConfig, PruningConfig,
    QueueConfig, ResolveConfig,
};
pub use message::QueueMessage;
pub use package::{
    Origin, PackageDraft, Resolver, ScrapeOutput, StoredPackage, VersionRecord, VersionSet,
    find_prior,
};
pub use seed::{GameSeed, Seed, SourceSeed};
pub use source::{Game, GameVersion, Source, SourceConfigEntry, SourceGraph, SourceSettings};
