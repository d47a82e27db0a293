// src/config.rs

//! Configuration loading utilities.
//!
//! Settings come from, in increasing precedence:
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, `$PINBACKUP_CONFIG` or `./pinbackup.toml`)
//! 3. `PINBACKUP_<SECTION>_<KEY>` environment variables

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PINBACKUP";

/// File name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pinbackup.toml";

/// Where the config file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by `--config` or `$PINBACKUP_CONFIG`; it must load.
    Explicit(PathBuf),
    /// `./pinbackup.toml`; a broken file falls back to defaults.
    Local(PathBuf),
}

/// Pick the config file to read, if any.
pub fn config_path(explicit: Option<&Path>) -> Option<ConfigSource> {
    if let Some(path) = explicit {
        return Some(ConfigSource::Explicit(path.to_path_buf()));
    }
    if let Ok(path) = std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
        return Some(ConfigSource::Explicit(PathBuf::from(path)));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(ConfigSource::Local(local))
}

/// Load the configuration file (or defaults) and apply environment overrides.
///
/// A file named explicitly must exist and parse; only the implicit local
/// file falls back to defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match config_path(explicit) {
        Some(ConfigSource::Explicit(path)) => {
            log::debug!("Loading configuration from {}", path.display());
            Config::load(&path).map_err(|e| {
                AppError::config(format!("cannot load {}: {e}", path.display()))
            })?
        }
        Some(ConfigSource::Local(path)) => {
            log::debug!("Loading configuration from {}", path.display());
            Config::load_or_default(&path)
        }
        None => {
            log::debug!("No configuration file found. Using defaults.");
            Config::default()
        }
    };
    apply_env(&mut config)?;
    Ok(config)
}

/// Apply `PINBACKUP_*` variables from the process environment.
pub fn apply_env(config: &mut Config) -> Result<()> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary lookup, keyed like `PINBACKUP_REDIS_HOST`.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    env.string("REDIS_HOST", &mut config.redis.host);
    env.parse("REDIS_PORT", &mut config.redis.port)?;
    env.parse("REDIS_MAX_ACTIVE", &mut config.redis.max_active)?;
    env.parse("REDIS_MAX_IDLE", &mut config.redis.max_idle)?;
    env.parse("REDIS_IDLE_TIMEOUT_SECS", &mut config.redis.idle_timeout_secs)?;
    env.parse("REDIS_WAIT_TIMEOUT_SECS", &mut config.redis.wait_timeout_secs)?;
    env.string("REDIS_NAMESPACE", &mut config.redis.namespace);

    env.string("QUEUES_BOARDS", &mut config.queues.boards);
    env.string("QUEUES_DOWNLOAD", &mut config.queues.download);

    env.string("STORAGE_DOWNLOAD_PATH", &mut config.storage.download_path);
    if let Some(value) = env.get("STORAGE_STORAGE_TYPE") {
        config.storage.storage_type = toml::Value::String(value.clone())
            .try_into()
            .map_err(|_| invalid("STORAGE_STORAGE_TYPE", &value))?;
    }

    env.parse("DOWNLOADER_WORKERS", &mut config.downloader.workers)?;
    env.parse("DOWNLOADER_TIMEOUT_SECS", &mut config.downloader.timeout_secs)?;
    env.string("DOWNLOADER_USER_AGENT", &mut config.downloader.user_agent);

    env.parse("SCRAPER_WORKERS", &mut config.scraper.workers)?;
    env.string("SCRAPER_BROWSER_HOST", &mut config.scraper.browser_host);
    env.parse("SCRAPER_BROWSER_PORT", &mut config.scraper.browser_port)?;
    env.string("SCRAPER_LOGIN_NAME", &mut config.scraper.login_name);
    env.string("SCRAPER_LOGIN_PASSWORD", &mut config.scraper.login_password);
    env.string("SCRAPER_AUTH_COOKIE", &mut config.scraper.auth_cookie);
    env.string("SCRAPER_SELECTOR_PREVIEW_PINS", &mut config.scraper.selector_preview_pins);
    env.string("SCRAPER_SELECTOR_PINS_COUNT", &mut config.scraper.selector_pins_count);
    env.parse("SCRAPER_TERMINATION", &mut config.scraper.termination)?;
    env.parse("SCRAPER_LOGIN_SETTLE_SECS", &mut config.scraper.login_settle_secs)?;
    env.parse("SCRAPER_SCROLL_SETTLE_SECS", &mut config.scraper.scroll_settle_secs)?;
    env.parse("SCRAPER_WAIT_TIMEOUT_SECS", &mut config.scraper.wait_timeout_secs)?;

    env.string("IMPORTER_IMPORT_DIR", &mut config.importer.import_dir);
    env.parse("IMPORTER_WORKERS", &mut config.importer.workers)?;

    env.string("SERVER_BIND", &mut config.server.bind);
    env.parse("SERVER_PORT", &mut config.server.port)?;
    env.parse("SERVER_SHUTDOWN_GRACE_SECS", &mut config.server.shutdown_grace_secs)?;

    Ok(())
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}_{key}"))
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            log::debug!("Override {}_{} from environment", ENV_PREFIX, key);
            *target = value;
        }
    }

    fn parse<T: FromStr>(&self, key: &str, target: &mut T) -> Result<()> {
        if let Some(value) = self.get(key) {
            *target = value.trim().parse().map_err(|_| invalid(key, &value))?;
            log::debug!("Override {}_{} from environment", ENV_PREFIX, key);
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> AppError {
    AppError::config(format!("invalid value '{value}' for {ENV_PREFIX}_{key}"))
}
