use std::env;
use std::str::FromStr;

use crate::error::{EventStoreError, Result};

/// Event store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // Postgres
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,

    // Writes
    /// How many fresh ids `append` tries after an id collision.
    pub id_retry_limit: u32,

    // Reads
    /// Cap applied to the facade's bounded scans.
    pub default_scan_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            run_migrations: true,
            id_retry_limit: 3,
            default_scan_limit: 500,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    /// Unset variables fall back to the defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            max_connections: parsed_env("EVENTS_DB_MAX_CONNECTIONS", defaults.max_connections)?,
            run_migrations: flag_env("EVENTS_RUN_MIGRATIONS", defaults.run_migrations)?,
            id_retry_limit: parsed_env("EVENTS_ID_RETRY_LIMIT", defaults.id_retry_limit)?,
            default_scan_limit: parsed_env("EVENTS_SCAN_LIMIT", defaults.default_scan_limit)?,
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn flag_env(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => parse_flag(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| EventStoreError::Config(format!("{key} must be a number, got {raw:?}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EventStoreError::Config(format!(
            "{key} must be true or false, got {raw:?}"
        ))),
    }
}
