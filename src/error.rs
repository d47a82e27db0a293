// src/error.rs

//! Unified error handling for the backup pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
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

    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Broker pool was never created or has been closed
    #[error("Broker not initialized")]
    NotInitialized,

    /// No broker connection could be obtained
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// PUBLISH was rejected
    #[error("Error publish {payload} to {channel}: {message}")]
    PublishFailed {
        channel: String,
        payload: String,
        message: String,
    },

    /// Index read or write failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The broker subscription ended
    #[error("Subscription to {0} closed")]
    SubscriptionClosed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation error
    #[error("{0}")]
    Validation(String),

    /// Picture URL cannot be mapped to a file name
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Destination directory could not be created
    #[error("Creating destination directory for picture {url} failed: {message}")]
    DirectoryCreateFailed { url: String, message: String },

    /// Picture could not be fetched
    #[error("Fetching picture {url} failed: {message}")]
    FetchFailed { url: String, message: String },

    /// Login sequence in the browser failed
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Browser automation step failed
    #[error("Browser driver error during {step}: {message}")]
    Driver { step: String, message: String },

    /// Batch import failed
    #[error("Import error: {0}")]
    Import(String),

    /// Every worker of a pool has exited
    #[error("All workers of {0} stopped")]
    WorkersStopped(String),

    /// Work was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,
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

    /// Create a publish error, abbreviating long payloads.
    pub fn publish(channel: impl Into<String>, payload: &[u8], message: impl fmt::Display) -> Self {
        let text = String::from_utf8_lossy(payload);
        let payload = if text.chars().count() > 15 {
            format!("{}...", text.chars().take(12).collect::<String>())
        } else {
            text.into_owned()
        };
        Self::PublishFailed {
            channel: channel.into(),
            payload,
            message: message.to_string(),
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a fetch error.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::FetchFailed {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a browser driver error for the given step.
    pub fn driver(step: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Driver {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Create an import error.
    pub fn import(message: impl Into<String>) -> Self {
        Self::Import(message.into())
    }

    /// Whether the error must terminate the worker loop that observed it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::BrokerUnavailable(_) | Self::SubscriptionClosed(_)
        )
    }
}
