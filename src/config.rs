use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub results: ResultsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// Base URL of the results collector API
    pub api_url: String,
    /// HTTP timeout for result fetches (seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Minutes after the race start before the first check
    #[serde(default = "default_wait_minutes")]
    pub wait_minutes: i64,
    /// Seconds between check cycles
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Seconds between retries for one race
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: i64,
    /// Fetch attempts before a race is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hours of history restored checks may reach back
    #[serde(default = "default_recovery_window_hours")]
    pub recovery_window_hours: i64,
    /// Seconds a processed race marker stays fresh
    #[serde(default = "default_processed_ttl_secs")]
    pub processed_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "sqlite://steward.db")?
            .set_default("database.max_connections", 5)?
            .set_default("results.api_url", "http://127.0.0.1:8788")?
            .set_default("results.fetch_timeout_secs", 30)?
            .set_default("results.wait_minutes", 15)?
            .set_default("results.check_interval_secs", 60)?
            .set_default("results.retry_interval_secs", 180)?
            .set_default("results.max_retries", 5)?
            .set_default("results.recovery_window_hours", 24)?
            .set_default("results.processed_ttl_secs", 3600)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("STEWARD_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (STEWARD_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("STEWARD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be at least 1".to_string());
        }

        if self.results.api_url.is_empty() {
            errors.push("results.api_url must not be empty".to_string());
        }
        if self.results.check_interval_secs == 0 {
            errors.push("results.check_interval_secs must be at least 1".to_string());
        }
        if self.results.max_retries == 0 {
            errors.push("results.max_retries must be at least 1".to_string());
        }
        if self.results.wait_minutes < 0 {
            errors.push("results.wait_minutes must not be negative".to_string());
        }
        if self.results.retry_interval_secs < 0 {
            errors.push("results.retry_interval_secs must not be negative".to_string());
        }
        if self.results.recovery_window_hours <= 0 {
            errors.push("results.recovery_window_hours must be positive".to_string());
        }
        if self.results.processed_ttl_secs <= 0 {
            errors.push("results.processed_ttl_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_wait_minutes() -> i64 {
    15
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_retry_interval_secs() -> i64 {
    180
}

fn default_max_retries() -> u32 {
    5
}

fn default_recovery_window_hours() -> i64 {
    24
}

fn default_processed_ttl_secs() -> i64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_files_present() {
        let config = AppConfig::load_from("does-not-exist").unwrap();
        assert_eq!(config.database.url, "sqlite://steward.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.results.api_url, "http://127.0.0.1:8788");
        assert_eq!(config.results.wait_minutes, 15);
        assert_eq!(config.results.check_interval_secs, 60);
        assert_eq!(config.results.retry_interval_secs, 180);
        assert_eq!(config.results.max_retries, 5);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = AppConfig::load_from("does-not-exist").unwrap();
        config.database.url.clear();
        config.results.check_interval_secs = 0;
        config.results.recovery_window_hours = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("database.url")));
    }
}
