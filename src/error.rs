// src/error.rs

//! Unified error handling for the generator.

use std::fmt;

use thiserror::Error;

/// Result type alias for generator operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Database query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Fetch results of different shapes cannot be merged
    #[error("Invalid shape: cannot merge list-shaped and keyed fetch results")]
    InvalidShape,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Adapter failure for one source
    #[error("Platform error for {context}: {message}")]
    Platform { context: String, message: String },

    /// Deferred origin could not be resolved
    #[error("Origin resolution failed: {0}")]
    Resolve(String),

    /// Queue or notification publish failed
    #[error("Queue error: {0}")]
    Queue(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a platform error with context.
    pub fn platform(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Platform {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an origin resolution error.
    pub fn resolve(message: impl fmt::Display) -> Self {
        Self::Resolve(message.to_string())
    }

    /// Create a queue error.
    pub fn queue(message: impl fmt::Display) -> Self {
        Self::Queue(message.to_string())
    }
}
