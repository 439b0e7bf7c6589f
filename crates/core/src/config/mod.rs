//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (DYNCACHE_*)
//! 2. TOML config file (if DYNCACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Cache groups are normally declared in the TOML file:
//!
//! ```toml
//! [[groups]]
//! name = "api"
//! patterns = ["^https://api\\.example\\.com/"]
//! strategy = "performance"
//! max_size = 100
//! max_age_ms = 3600000
//! timeout_ms = 5000
//! refresh_ahead_ms = 600000
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::Error;

mod validation;

pub use validation::ConfigError;

/// Request-handling strategy of a cache group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Strategy {
    /// Prefer the live network response, fall back to any cached copy.
    Freshness,
    /// Prefer a cached response inside the freshness window, refresh in background.
    Performance,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Freshness => "freshness",
            Strategy::Performance => "performance",
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "freshness" => Ok(Strategy::Freshness),
            "performance" => Ok(Strategy::Performance),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl TryFrom<String> for Strategy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one cache group. Read-only once the group is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name, used in the persisted store namespaces.
    pub name: String,

    /// URL regular expressions; a request belongs to the group if any matches.
    pub patterns: Vec<String>,

    pub strategy: Strategy,

    /// Maximum number of cached URLs before the least recently used is evicted.
    pub max_size: usize,

    /// Maximum age of a cached entry before it is considered stale.
    pub max_age_ms: u64,

    /// Network race timeout. Without it the network is fetched plainly.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Age at which a fresh cached entry triggers a background refresh (performance only).
    #[serde(default)]
    pub refresh_ahead_ms: Option<u64>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, patterns: Vec<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            patterns,
            strategy,
            max_size: default_max_size(),
            max_age_ms: default_max_age_ms(),
            timeout_ms: None,
            refresh_ahead_ms: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (DYNCACHE_*)
/// 2. TOML config file (if DYNCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite store database.
    ///
    /// Set via DYNCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Namespace prefix for every persisted store.
    ///
    /// Set via DYNCACHE_PREFIX environment variable.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via DYNCACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Hard HTTP client timeout in milliseconds.
    ///
    /// Independent of the per-group race timeout: this one aborts the request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cache groups, consulted in order.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./dyncache.sqlite")
}

fn default_prefix() -> String {
    "dyncache".into()
}

fn default_user_agent() -> String {
    "dyncache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_size() -> usize {
    100
}

fn default_max_age_ms() -> u64 {
    3_600_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            prefix: default_prefix(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            groups: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be read or
    /// parsed (an unknown strategy name fails here), or if validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("DYNCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment)
    }

    /// Load from a TOML string layered over the defaults.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let figment = figment.merge(
            Env::prefixed("DYNCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }
}
