//! Configuration loading for machdash.
//!
//! TOML file + `MACHDASH_`-prefixed environment variables, merged with
//! figment, then translated to `machdash_core::RuntimeConfig`. The
//! core crate never reads files itself — embedding applications call
//! [`load_config`] (or [`load_config_or_default`]) here and hand the
//! result down.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use machdash_core::RuntimeConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Backend connection. Absent means preview mode (simulated data).
    #[serde(default)]
    pub server: Server,

    /// Local cache settings.
    #[serde(default)]
    pub cache: Cache,

    /// Polling cadence and limits.
    #[serde(default)]
    pub polling: Polling,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Server {
    /// Backend base URL (e.g., "http://192.168.1.50:8000"). `None`
    /// enables preview mode.
    pub url: Option<String>,

    /// Request timeout in seconds for catalog/poll/history requests.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Request timeout in seconds for the distribution long-poll.
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_timeout(),
            long_poll_timeout: default_long_poll_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Cache {
    /// Cache database path. `None` resolves a platform data directory;
    /// the literal string ":memory:" selects an in-memory cache.
    pub path: Option<PathBuf>,

    /// Freshness window in seconds for cached backend records.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            path: None,
            ttl_seconds: default_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Polling {
    /// Fast poll cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Delay in milliseconds between distribution long-poll attempts.
    #[serde(default = "default_long_poll_delay_ms")]
    pub long_poll_delay_ms: u64,

    /// Maximum points fetched by the one-shot history backfill.
    #[serde(default = "default_backfill_limit")]
    pub history_backfill_limit: u32,

    /// Retained sample count per metric stream.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            long_poll_delay_ms: default_long_poll_delay_ms(),
            history_backfill_limit: default_backfill_limit(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}
fn default_long_poll_timeout() -> u64 {
    45
}
fn default_ttl() -> u64 {
    3600
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_long_poll_delay_ms() -> u64 {
    1000
}
fn default_backfill_limit() -> u32 {
    500
}
fn default_buffer_capacity() -> usize {
    600
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "machdash", "machdash").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default cache database location under the platform data directory.
pub fn default_cache_path() -> PathBuf {
    ProjectDirs::from("io", "machdash", "machdash").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("cache.db");
            p
        },
        |dirs| dirs.data_dir().join("cache.db"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".machdash");
    p
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load the full [`Config`] from file + environment. Environment keys
/// use the `MACHDASH_` prefix with `__` as the section separator, e.g.
/// `MACHDASH_SERVER__URL` or `MACHDASH_POLLING__INTERVAL_MS`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, still merging the environment.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MACHDASH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning defaults (preview mode) if the file doesn't
/// exist or fails to parse.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a [`RuntimeConfig`] from the loaded file config.
pub fn to_runtime_config(cfg: &Config) -> Result<RuntimeConfig, ConfigError> {
    let server_url = match cfg.server.url.as_deref() {
        Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Validation {
            field: "server.url".into(),
            reason: format!("invalid URL: {raw}"),
        })?),
        None => None,
    };

    if cfg.polling.interval_ms == 0 {
        return Err(ConfigError::Validation {
            field: "polling.interval_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if cfg.polling.buffer_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "polling.buffer_capacity".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let cache_path = match cfg.cache.path.as_deref() {
        Some(p) if p.as_os_str() == ":memory:" => None,
        Some(p) => Some(p.to_path_buf()),
        None => Some(default_cache_path()),
    };

    Ok(RuntimeConfig {
        server_url,
        cache_path,
        cache_ttl: Duration::from_secs(cfg.cache.ttl_seconds),
        poll_interval: Duration::from_millis(cfg.polling.interval_ms),
        request_timeout: Duration::from_secs(cfg.server.timeout),
        long_poll_timeout: Duration::from_secs(cfg.server.long_poll_timeout),
        long_poll_delay: Duration::from_millis(cfg.polling.long_poll_delay_ms),
        history_backfill_limit: cfg.polling.history_backfill_limit,
        buffer_capacity: cfg.polling.buffer_capacity,
    })
}
