use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::OrchestratorConfig;

/// Configuration error types. Fatal at startup; the CLI maps these to
/// exit code 2.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid poll_interval_ms: must be greater than 0")]
    InvalidPollInterval,

    #[error("Invalid {var}: '{value}' is not a non-negative integer")]
    InvalidSessionLimit { var: &'static str, value: String },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid db_retry.max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_delay_ms ({0}) must be less than max_delay_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid quiet hours: start_hour and end_hour must be below 24")]
    InvalidQuietHours,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Environment variables recognized outside the `FOREMAN_` namespace.
const OPUS_SESSION_LIMIT: &str = "OPUS_SESSION_LIMIT";
const SONNET_SESSION_LIMIT: &str = "SONNET_SESSION_LIMIT";

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .foreman/config.yaml (project config)
    /// 3. .foreman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (`FOREMAN_*` prefix)
    /// 5. `OPUS_SESSION_LIMIT` / `SONNET_SESSION_LIMIT`
    pub fn load() -> Result<OrchestratorConfig> {
        let mut config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(".foreman/config.yaml"))
            .merge(Yaml::file(".foreman/local.yaml"))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::apply_session_limit_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig> {
        let mut config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::apply_session_limit_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// The two session-limit variables override the capacity section. A set
    /// but non-integer value is a typed configuration error, not a silent
    /// fallback.
    fn apply_session_limit_env(config: &mut OrchestratorConfig) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(OPUS_SESSION_LIMIT) {
            config.capacity.opus_session_limit =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSessionLimit {
                        var: OPUS_SESSION_LIMIT,
                        value,
                    })?;
        }
        if let Ok(value) = std::env::var(SONNET_SESSION_LIMIT) {
            config.capacity.sonnet_session_limit =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSessionLimit {
                        var: SONNET_SESSION_LIMIT,
                        value,
                    })?;
        }
        Ok(())
    }

    /// Validate configuration after loading.
    pub fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.db_retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.db_retry.max_retries));
        }

        if config.db_retry.initial_delay_ms >= config.db_retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                config.db_retry.initial_delay_ms,
                config.db_retry.max_delay_ms,
            ));
        }

        if let Some(quiet) = &config.quiet_hours {
            if quiet.start_hour >= 24 || quiet.end_hour >= 24 {
                return Err(ConfigError::InvalidQuietHours);
            }
        }

        if config.circuit_breaker.error_rate_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "circuit_breaker.error_rate_window cannot be 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&config.circuit_breaker.error_rate_threshold) {
            return Err(ConfigError::ValidationFailed(
                "circuit_breaker.error_rate_threshold must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}
