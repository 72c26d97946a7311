//! `config.json` loading (§6), with environment-variable overrides for the
//! database connection fields.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {name} could not be parsed: {value}")]
    BadEnvOverride { name: &'static str, value: String },
}

fn default_magic() -> u32 {
    constants::DEFAULT_MAGIC
}

fn default_per_region_target() -> usize {
    constants::DEFAULT_PER_REGION_TARGET
}

fn default_target_countries() -> Vec<String> {
    // 17 codes spanning six macro-regions, per §4.5's reference value.
    [
        "US", "CA", "BR", "DE", "FR", "GB", "NL", "RU", "CN", "JP", "SG", "IN", "AU", "ZA", "NG",
        "AE", "KR",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_per_country_cap() -> usize {
    constants::DISCOVERY_PER_COUNTRY_CAP
}

fn default_discovery_interval_secs() -> u64 {
    constants::DISCOVERY_INTERVAL.as_secs()
}

fn default_node_directory_url() -> String {
    "https://nodes.example-directory.invalid/nodes.json".to_string()
}

fn default_geolocation_url() -> String {
    "https://geo.example-provider.invalid/batch".to_string()
}

/// Database connection fields (§6). `SENTINEL_DB_HOST`, `SENTINEL_DB_PORT`,
/// `SENTINEL_DB_USER`, `SENTINEL_DB_PASSWORD`, `SENTINEL_DB_NAME` override
/// the matching field when present; an override that fails to parse aborts
/// startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_db_port() -> u16 {
    5432
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Applies `SENTINEL_DB_*` overrides. Any present-but-unparseable
    /// override is a startup failure (§6).
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("SENTINEL_DB_HOST") {
            self.host = host;
        }
        if let Ok(raw) = std::env::var("SENTINEL_DB_PORT") {
            self.port = raw.parse().map_err(|_| ConfigError::BadEnvOverride {
                name: "SENTINEL_DB_PORT",
                value: raw,
            })?;
        }
        if let Ok(user) = std::env::var("SENTINEL_DB_USER") {
            self.user = user;
        }
        if let Ok(password) = std::env::var("SENTINEL_DB_PASSWORD") {
            self.password = password;
        }
        if let Ok(database) = std::env::var("SENTINEL_DB_NAME") {
            self.database = database;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default = "default_magic")]
    pub magic: u32,

    #[serde(default = "default_per_region_target")]
    pub per_region_target: usize,

    #[serde(default = "default_target_countries")]
    pub target_countries: Vec<String>,

    #[serde(default = "default_per_country_cap")]
    pub per_country_cap: usize,

    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_node_directory_url")]
    pub node_directory_url: String,

    #[serde(default = "default_geolocation_url")]
    pub geolocation_url: String,

    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_metrics_addr() -> String {
    constants::DEFAULT_METRICS_ADDR.to_string()
}

impl Config {
    /// Reads and parses `config.json` from `path`, then applies
    /// `SENTINEL_DB_*` environment overrides.
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&raw)?;
        config.database.apply_env_overrides()?;
        Ok(config)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let json = r#"{
            "database": { "host": "localhost", "user": "sentinel", "password": "x", "database": "sentinel" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.per_region_target, constants::DEFAULT_PER_REGION_TARGET);
        assert_eq!(config.magic, constants::DEFAULT_MAGIC);
        assert_eq!(config.target_countries.len(), 17);
    }

    #[test]
    fn env_override_replaces_db_host() {
        let mut db = DatabaseConfig {
            host: "original".to_string(),
            port: 5432,
            user: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
        };
        std::env::set_var("SENTINEL_DB_HOST", "overridden");
        db.apply_env_overrides().unwrap();
        std::env::remove_var("SENTINEL_DB_HOST");
        assert_eq!(db.host, "overridden");
    }

    #[test]
    fn bad_env_port_override_is_rejected() {
        let mut db = DatabaseConfig {
            host: "h".to_string(),
            port: 5432,
            user: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
        };
        std::env::set_var("SENTINEL_DB_PORT", "not-a-port");
        let result = db.apply_env_overrides();
        std::env::remove_var("SENTINEL_DB_PORT");
        assert!(result.is_err());
    }
}
