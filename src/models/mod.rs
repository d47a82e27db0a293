// src/models/mod.rs

//! Domain models for the backup pipeline.

mod board;
mod config;
mod user;

// Re-export all public types
pub use board::{Board, Picture};
pub use config::{
    Config, DownloaderConfig, ImporterConfig, QueueConfig, RedisConfig, ScraperConfig,
    ServerConfig, StorageConfig, StorageType, TerminationStrategy,
};
pub use user::User;
