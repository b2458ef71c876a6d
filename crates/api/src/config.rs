//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use saga::DEFAULT_LOCK_SHARDS;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: admin HTTP bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `ORCHESTRA_TOPIC`: inbound completion-event topic (default: `"orchestra-topic"`)
/// - `DEAD_LETTER_TOPIC`: undeliverable events (default: `"orchestra-dead-letter"`)
/// - `MAX_DELIVERIES`: attempts per inbound message (default: `3`)
/// - `CATALOG_PATH`: JSON step catalog; built-in catalog when unset
/// - `LOCK_SHARDS`: per-instance lock table size (default: `64`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub orchestra_topic: String,
    pub dead_letter_topic: String,
    pub max_deliveries: u32,
    pub catalog_path: Option<PathBuf>,
    pub lock_shards: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing, empty or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: var("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: var("DATABASE_URL"),
            orchestra_topic: var("ORCHESTRA_TOPIC").unwrap_or(defaults.orchestra_topic),
            dead_letter_topic: var("DEAD_LETTER_TOPIC").unwrap_or(defaults.dead_letter_topic),
            max_deliveries: var("MAX_DELIVERIES")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_deliveries),
            catalog_path: var("CATALOG_PATH").map(PathBuf::from),
            lock_shards: var("LOCK_SHARDS")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.lock_shards),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            orchestra_topic: "orchestra-topic".to_string(),
            dead_letter_topic: "orchestra-dead-letter".to_string(),
            max_deliveries: 3,
            catalog_path: None,
            lock_shards: DEFAULT_LOCK_SHARDS,
        }
    }
}
