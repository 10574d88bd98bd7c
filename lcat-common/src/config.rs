//! Configuration loading for the catalog service
//!
//! Settings resolve in this priority order:
//! 1. Command-line argument / environment variable (clap merges both)
//! 2. TOML config file
//! 3. Compiled defaults
//!
//! A missing TOML file is not an error; a malformed one is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5780";

/// Default per-call backend timeout
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Default primary pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Bootstrap configuration loaded from TOML file
///
/// Every field is optional; absent fields fall through to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Primary relational store URL (`sqlite://...` or `postgres://...`)
    #[serde(default)]
    pub database_url: Option<String>,

    /// HTTP listen address
    #[serde(default)]
    pub bind_addr: Option<String>,

    /// Per-call backend timeout in milliseconds
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,

    /// Upper bound of the primary connection pool
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// Whether the approximate strategies (title match, label siblings,
    /// recent sample) may answer artist→release lookups
    #[serde(default)]
    pub heuristic_fallbacks: Option<bool>,

    /// REST proxy settings (optional)
    #[serde(default)]
    pub rest: RestSection,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[rest]` table of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestSection {
    /// Base URL of the hosted REST proxy
    #[serde(default)]
    pub url: Option<String>,
    /// Static API key sent with every proxy request
    #[serde(default)]
    pub key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values supplied on the command line or through environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub rest_url: Option<String>,
    pub rest_key: Option<String>,
    pub bind_addr: Option<String>,
    pub query_timeout_ms: Option<u64>,
    pub max_connections: Option<u32>,
    pub heuristic_fallbacks: Option<bool>,
}

/// Connection settings for the REST proxy (secondary backend)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub url: String,
    pub key: String,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub database_url: String,
    pub rest: Option<RestConfig>,
    pub bind_addr: String,
    pub query_timeout: Duration,
    pub max_connections: u32,
    pub heuristic_fallbacks: bool,
    pub log_level: String,
}

impl CatalogConfig {
    /// Merge overrides, TOML values and compiled defaults
    pub fn resolve(overrides: ConfigOverrides, toml: Option<TomlConfig>) -> Result<Self> {
        let toml = toml.unwrap_or_default();

        let database_url = overrides
            .database_url
            .or(toml.database_url)
            .unwrap_or_else(default_database_url);

        let rest_url = non_blank(overrides.rest_url.or(toml.rest.url));
        let rest_key = non_blank(overrides.rest_key.or(toml.rest.key));
        let rest = match (rest_url, rest_key) {
            (Some(url), Some(key)) => Some(RestConfig {
                url: url.trim_end_matches('/').to_string(),
                key,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::Config(
                    "REST proxy URL is set but its API key is missing".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "REST proxy API key is set but its URL is missing".to_string(),
                ))
            }
        };

        let query_timeout_ms = overrides
            .query_timeout_ms
            .or(toml.query_timeout_ms)
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_MS);
        if query_timeout_ms == 0 {
            return Err(Error::Config("query_timeout_ms must be positive".to_string()));
        }

        let max_connections = overrides
            .max_connections
            .or(toml.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(Error::Config("max_connections must be positive".to_string()));
        }

        Ok(Self {
            database_url,
            rest,
            bind_addr: overrides
                .bind_addr
                .or(toml.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            query_timeout: Duration::from_millis(query_timeout_ms),
            max_connections,
            heuristic_fallbacks: overrides
                .heuristic_fallbacks
                .or(toml.heuristic_fallbacks)
                .unwrap_or(true),
            log_level: toml.logging.level,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Load the TOML bootstrap file
///
/// With an explicit path the file must exist. Without one, the platform
/// default location is tried and a missing file yields `Ok(None)`.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<Option<TomlConfig>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                info!("No config file found, using command line, environment and defaults");
                return Ok(None);
            }
        },
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config = toml::from_str::<TomlConfig>(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;

    info!("Loaded config file {}", path.display());
    Ok(Some(config))
}

/// Platform config location: `<config_dir>/lcat/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lcat").join("config.toml"))
}

/// OS-dependent default database location (read-only SQLite file)
fn default_database_url() -> String {
    let path = dirs::data_local_dir()
        .map(|d| d.join("lcat").join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("./lcat_data/catalog.db"));
    warn!(
        "No database URL configured, defaulting to {}",
        path.display()
    );
    format!("sqlite://{}?mode=ro", path.display())
}
