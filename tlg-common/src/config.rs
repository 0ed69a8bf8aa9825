//! Configuration loading and resolution
//!
//! Settings are resolved with the following priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file is not fatal: a warning is logged and the
//! remaining tiers are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TLG_CONFIG";
/// Environment variable overriding the worker thread count
pub const WORKER_THREADS_ENV: &str = "TLG_WORKER_THREADS";
/// Environment variable overriding the default category search depth
pub const DEFAULT_DEPTH_ENV: &str = "TLG_DEFAULT_DEPTH";
/// Environment variable naming the fixture dataset file
pub const DATASET_ENV: &str = "TLG_DATASET";
/// Environment variable overriding the HTTP bind address
pub const BIND_ADDR_ENV: &str = "TLG_BIND";

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level used when RUST_LOG is not set; blank falls back to
    /// the compiled default
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `config.toml`
///
/// Every field is optional so partial files are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub worker_threads: Option<usize>,
    pub default_depth: Option<u32>,
    pub dataset: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub logging: LoggingConfig,
}

/// Compiled defaults (lowest priority tier)
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub worker_threads: usize,
    pub default_depth: u32,
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            worker_threads: 10,
            default_depth: 2,
            bind_addr: "127.0.0.1:5790".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Values supplied on the command line (highest priority tier)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub worker_threads: Option<usize>,
    pub default_depth: Option<u32>,
    pub dataset: Option<PathBuf>,
    pub bind_addr: Option<String>,
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub worker_threads: usize,
    pub default_depth: u32,
    pub dataset: Option<PathBuf>,
    pub bind_addr: String,
    pub log_level: String,
}

impl Settings {
    /// Resolve settings from all four tiers
    pub fn resolve(cli: &CliOverrides, toml_config: &TomlConfig) -> Self {
        let defaults = CompiledDefaults::default();

        // zero is not a usable pool size; such a tier is skipped
        let worker_threads = cli
            .worker_threads
            .filter(|n| *n > 0)
            .or_else(|| env_parse::<usize>(WORKER_THREADS_ENV).filter(|n| *n > 0))
            .or(toml_config.worker_threads.filter(|n| *n > 0))
            .unwrap_or(defaults.worker_threads);

        let default_depth = cli
            .default_depth
            .or_else(|| env_parse::<u32>(DEFAULT_DEPTH_ENV))
            .or(toml_config.default_depth)
            .unwrap_or(defaults.default_depth);

        let dataset = cli
            .dataset
            .clone()
            .or_else(|| std::env::var(DATASET_ENV).ok().map(PathBuf::from))
            .or_else(|| toml_config.dataset.clone());

        let bind_addr = cli
            .bind_addr
            .clone()
            .or_else(|| std::env::var(BIND_ADDR_ENV).ok())
            .or_else(|| toml_config.bind_addr.clone())
            .unwrap_or(defaults.bind_addr);

        let log_level = Some(toml_config.logging.level.trim())
            .filter(|level| !level.is_empty())
            .map_or(defaults.log_level, str::to_string);

        Self {
            worker_threads,
            default_depth,
            dataset,
            bind_addr,
            log_level,
        }
    }
}

/// Read and parse an environment variable, ignoring (with a warning) values
/// that do not parse
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable value '{}' for {}", raw, name);
            None
        }
    }
}

/// Default per-user config file location (`~/.config/tlg/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tlg").join("config.toml"))
}

/// Find the config file to load, if any
///
/// `TLG_CONFIG` wins; otherwise the per-user file, then `/etc/tlg/config.toml`.
pub fn locate_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    if let Some(user_config) = default_config_path() {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/tlg/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load the config file if one can be found, falling back to defaults
pub fn load_or_default() -> TomlConfig {
    let Some(path) = locate_config_file() else {
        debug!("No config file found, using defaults");
        return TomlConfig::default();
    };

    match load_toml_config(&path) {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Config file {} unusable ({}), using defaults", path.display(), e);
            TomlConfig::default()
        }
    }
}
