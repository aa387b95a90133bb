//! Configuration
//!
//! Loaded hierarchically from:
//! - rustydao.toml (base configuration)
//! - rustydao.local.toml (git-ignored local overrides)
//! - Environment variables (RUSTYDAO_* prefix, `__` separates sections)
//!
//! ```toml
//! [query]
//! log_queries = true
//! slow_query_threshold_ms = 250
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! `RUSTYDAO_QUERY__SLOW_QUERY_THRESHOLD_MS=50` overrides the threshold.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub script: ScriptConfig,
}

/// Query instrumentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Install a `LoggingQueryListener` on new contexts
    #[serde(default = "default_true")]
    pub log_queries: bool,

    /// Queries at least this slow are logged at warn level (0 = never)
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// SQL script execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Run every script inside a single transaction
    #[serde(default = "default_true")]
    pub transactional: bool,
}

fn default_true() -> bool {
    true
}
fn default_slow_query_threshold_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            log_queries: true,
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            transactional: true,
        }
    }
}

impl Config {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("rustydao.toml"))
            .merge(Toml::file("rustydao.local.toml"))
            .merge(Env::prefixed("RUSTYDAO_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUSTYDAO_").split("__"))
            .extract()
    }
}
