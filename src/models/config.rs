//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker / index connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Channel names for the work queues
    #[serde(default)]
    pub queues: QueueConfig,

    /// Where downloaded pictures are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Download worker settings
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// Scrape worker settings
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Batch importer settings
    #[serde(default)]
    pub importer: ImporterConfig,

    /// Intake API settings
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.redis.host.trim().is_empty() {
            return Err(AppError::validation("redis.host is empty"));
        }
        if self.redis.port == 0 {
            return Err(AppError::validation("redis.port must be > 0"));
        }
        if self.redis.max_active == 0 {
            return Err(AppError::validation("redis.max_active must be > 0"));
        }
        if self.redis.max_idle > self.redis.max_active {
            return Err(AppError::validation(
                "redis.max_idle must not exceed redis.max_active",
            ));
        }
        if self.queues.boards.trim().is_empty() || self.queues.download.trim().is_empty() {
            return Err(AppError::validation("queue names must not be empty"));
        }
        if self.storage.storage_type != StorageType::Fs {
            return Err(AppError::validation("only the fs storage type is supported"));
        }
        if self.downloader.workers == 0 {
            return Err(AppError::validation("downloader.workers must be > 0"));
        }
        if self.downloader.timeout_secs == 0 {
            return Err(AppError::validation("downloader.timeout_secs must be > 0"));
        }
        if self.scraper.workers == 0 {
            return Err(AppError::validation("scraper.workers must be > 0"));
        }
        if self.importer.workers == 0 {
            return Err(AppError::validation("importer.workers must be > 0"));
        }
        Ok(())
    }

    /// Validate the settings only the scrape worker needs.
    pub fn validate_scraper(&self) -> Result<()> {
        self.validate()?;
        if self.scraper.selector_preview_pins.trim().is_empty() {
            return Err(AppError::validation(
                "scraper.selector_preview_pins is required",
            ));
        }
        if self.scraper.termination == TerminationStrategy::PinCount
            && self.scraper.selector_pins_count.trim().is_empty()
        {
            return Err(AppError::validation(
                "scraper.selector_pins_count is required for pin-count termination",
            ));
        }
        Ok(())
    }
}

/// Redis connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "defaults::redis_host")]
    pub host: String,

    #[serde(default = "defaults::redis_port")]
    pub port: u16,

    /// Maximum number of pooled connections
    #[serde(default = "defaults::max_active")]
    pub max_active: usize,

    /// Idle connections kept around by the reaper
    #[serde(default = "defaults::max_idle")]
    pub max_idle: usize,

    /// Idle connections older than this are dropped
    #[serde(default = "defaults::idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How long to wait for a free connection
    #[serde(default = "defaults::wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Prefix of every index key; empty keeps plain `user:board` keys
    #[serde(default)]
    pub namespace: String,
}

impl RedisConfig {
    /// Connection URL for the configured host and port.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: defaults::redis_host(),
            port: defaults::redis_port(),
            max_active: defaults::max_active(),
            max_idle: defaults::max_idle(),
            idle_timeout_secs: defaults::idle_timeout(),
            wait_timeout_secs: defaults::wait_timeout(),
            namespace: String::new(),
        }
    }
}

/// Pub/sub channel names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "defaults::boards_queue")]
    pub boards: String,

    #[serde(default = "defaults::download_queue")]
    pub download: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            boards: defaults::boards_queue(),
            download: defaults::download_queue(),
        }
    }
}

/// Supported picture storage backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Fs,
}

/// Picture storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_type: StorageType,

    /// Root directory for `{user}/{path}/{filename}`
    #[serde(default = "defaults::download_path")]
    pub download_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Fs,
            download_path: defaults::download_path(),
        }
    }
}

/// Download worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Concurrent downloads
    #[serde(default = "defaults::live_workers")]
    pub workers: usize,

    #[serde(default = "defaults::download_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: defaults::live_workers(),
            timeout_secs: defaults::download_timeout(),
            user_agent: defaults::user_agent(),
        }
    }
}

/// How the scrape engine decides a board is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationStrategy {
    /// Stop when two scroll batches end on the same picture
    #[default]
    Convergence,
    /// Stop once the board's advertised pin count is reached
    PinCount,
}

impl std::str::FromStr for TerminationStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "convergence" => Ok(Self::Convergence),
            "pin-count" | "pincount" | "pin_count" => Ok(Self::PinCount),
            other => Err(AppError::config(format!(
                "unknown termination strategy '{other}'"
            ))),
        }
    }
}

/// Scrape worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Concurrent boards
    #[serde(default = "defaults::live_workers")]
    pub workers: usize,

    /// Host running Chrome with remote debugging enabled
    #[serde(default = "defaults::browser_host")]
    pub browser_host: String,

    #[serde(default = "defaults::browser_port")]
    pub browser_port: u16,

    #[serde(default)]
    pub login_name: String,

    #[serde(default)]
    pub login_password: String,

    /// Cookie whose presence means the session is logged in
    #[serde(default = "defaults::auth_cookie")]
    pub auth_cookie: String,

    /// CSS selector matching preview pins on a board page
    #[serde(default)]
    pub selector_preview_pins: String,

    /// CSS selector of the element showing the pin count
    #[serde(default)]
    pub selector_pins_count: String,

    #[serde(default)]
    pub termination: TerminationStrategy,

    #[serde(default = "defaults::login_settle")]
    pub login_settle_secs: u64,

    #[serde(default = "defaults::scroll_settle")]
    pub scroll_settle_secs: u64,

    /// Upper bound for a single wait-visible step
    #[serde(default = "defaults::wait_timeout_browser")]
    pub wait_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            workers: defaults::live_workers(),
            browser_host: defaults::browser_host(),
            browser_port: defaults::browser_port(),
            login_name: String::new(),
            login_password: String::new(),
            auth_cookie: defaults::auth_cookie(),
            selector_preview_pins: String::new(),
            selector_pins_count: String::new(),
            termination: TerminationStrategy::default(),
            login_settle_secs: defaults::login_settle(),
            scroll_settle_secs: defaults::scroll_settle(),
            wait_timeout_secs: defaults::wait_timeout_browser(),
        }
    }
}

/// Batch importer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Directory laid out as `{user}/{board}/{file}`
    #[serde(default = "defaults::import_dir")]
    pub import_dir: String,

    /// Workers per pipeline stage
    #[serde(default = "defaults::import_workers")]
    pub workers: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            import_dir: defaults::import_dir(),
            workers: defaults::import_workers(),
        }
    }
}

/// Intake API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::bind")]
    pub bind: String,

    #[serde(default = "defaults::server_port")]
    pub port: u16,

    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
            port: defaults::server_port(),
            shutdown_grace_secs: defaults::shutdown_grace(),
        }
    }
}

mod defaults {
    // Redis defaults
    pub fn redis_host() -> String {
        "localhost".into()
    }
    pub fn redis_port() -> u16 {
        6379
    }
    pub fn max_active() -> usize {
        100
    }
    pub fn max_idle() -> usize {
        10
    }
    pub fn idle_timeout() -> u64 {
        240
    }
    pub fn wait_timeout() -> u64 {
        5
    }

    // Queue defaults
    pub fn boards_queue() -> String {
        "boards".into()
    }
    pub fn download_queue() -> String {
        "download".into()
    }

    // Storage defaults
    pub fn download_path() -> String {
        "/tmp".into()
    }

    // Worker defaults
    pub fn live_workers() -> usize {
        1
    }
    pub fn download_timeout() -> u64 {
        60
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; pinbackup/0.1)".into()
    }

    // Scraper defaults
    pub fn browser_host() -> String {
        "localhost".into()
    }
    pub fn browser_port() -> u16 {
        9222
    }
    pub fn auth_cookie() -> String {
        "_auth".into()
    }
    pub fn login_settle() -> u64 {
        10
    }
    pub fn scroll_settle() -> u64 {
        2
    }
    pub fn wait_timeout_browser() -> u64 {
        30
    }

    // Importer defaults
    pub fn import_dir() -> String {
        "/tmp".into()
    }
    pub fn import_workers() -> usize {
        5
    }

    // Server defaults
    pub fn bind() -> String {
        "0.0.0.0".into()
    }
    pub fn server_port() -> u16 {
        3333
    }
    pub fn shutdown_grace() -> u64 {
        15
    }
}
