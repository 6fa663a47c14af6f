//! Orchestrator configuration model.
//!
//! Loaded by `infrastructure::config::ConfigLoader` with hierarchical
//! merging; every field has a serde default so partial config files work.

use serde::{Deserialize, Serialize};

/// Main configuration structure for Foreman.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Main loop tick interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-tier session limits.
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Global cap across both tiers; 0 means the per-tier limits alone bound
    /// concurrency.
    #[serde(default)]
    pub max_concurrent_agents: usize,

    /// How long `stop()` waits for running agents before force-terminating.
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,

    /// Where the active-agents set is persisted across restarts.
    #[serde(default)]
    pub state_file_path: Option<String>,

    /// Probe the database before entering the run loop.
    #[serde(default = "default_true")]
    pub validate_database_on_startup: bool,

    /// Run pre-flight checks during start().
    #[serde(default = "default_true")]
    pub run_pre_flight_checks: bool,

    /// Backoff parameters for the startup database gate.
    #[serde(default)]
    pub db_retry: DbRetryConfig,

    /// Consecutive tick-time DB failures before entering degraded mode.
    #[serde(default = "default_max_consecutive_db_failures")]
    pub max_consecutive_db_failures: u32,

    /// Budget limits in USD.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Circuit breaker thresholds.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Interval for periodic status check-ins; 0 disables them.
    #[serde(default)]
    pub status_check_in_interval_ms: u64,

    /// Quiet hours for normal-priority notifications.
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_graceful_shutdown_timeout_ms() -> u64 {
    30_000
}

const fn default_max_consecutive_db_failures() -> u32 {
    3
}

const fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            capacity: CapacityConfig::default(),
            max_concurrent_agents: 0,
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
            state_file_path: None,
            validate_database_on_startup: true,
            run_pre_flight_checks: true,
            db_retry: DbRetryConfig::default(),
            max_consecutive_db_failures: default_max_consecutive_db_failures(),
            budget: BudgetConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            status_check_in_interval_ms: 0,
            quiet_hours: None,
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Per-tier concurrent session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CapacityConfig {
    #[serde(default = "default_opus_limit")]
    pub opus_session_limit: usize,

    #[serde(default = "default_sonnet_limit")]
    pub sonnet_session_limit: usize,
}

const fn default_opus_limit() -> usize {
    2
}

const fn default_sonnet_limit() -> usize {
    5
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            opus_session_limit: default_opus_limit(),
            sonnet_session_limit: default_sonnet_limit(),
        }
    }
}

/// Exponential backoff parameters for the startup database gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DbRetryConfig {
    #[serde(default = "default_db_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_db_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_db_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_db_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

const fn default_db_max_retries() -> u32 {
    5
}

const fn default_db_initial_delay_ms() -> u64 {
    500
}

const fn default_db_max_delay_ms() -> u64 {
    30_000
}

const fn default_db_backoff_multiplier() -> f64 {
    2.0
}

impl Default for DbRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_db_max_retries(),
            initial_delay_ms: default_db_initial_delay_ms(),
            max_delay_ms: default_db_max_delay_ms(),
            backoff_multiplier: default_db_backoff_multiplier(),
        }
    }
}

/// Spend limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    #[serde(default)]
    pub daily_budget_usd: Option<f64>,

    #[serde(default)]
    pub weekly_budget_usd: Option<f64>,

    #[serde(default = "default_true")]
    pub hard_stop_at_budget_limit: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: None,
            weekly_budget_usd: None,
            hard_stop_at_budget_limit: true,
        }
    }
}

/// Circuit breaker thresholds, mirrored into `CircuitBreakerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_max_consecutive_agent_errors")]
    pub max_consecutive_agent_errors: u32,

    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    #[serde(default = "default_error_rate_window")]
    pub error_rate_window: usize,

    #[serde(default = "default_hard_budget_limit_usd")]
    pub hard_budget_limit_usd: f64,

    #[serde(default = "default_token_limit_without_output")]
    pub token_limit_without_output: u64,
}

const fn default_max_consecutive_agent_errors() -> u32 {
    3
}

const fn default_error_rate_threshold() -> f64 {
    0.5
}

const fn default_error_rate_window() -> usize {
    10
}

const fn default_hard_budget_limit_usd() -> f64 {
    100.0
}

const fn default_token_limit_without_output() -> u64 {
    100_000
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_agent_errors: default_max_consecutive_agent_errors(),
            error_rate_threshold: default_error_rate_threshold(),
            error_rate_window: default_error_rate_window(),
            hard_budget_limit_usd: default_hard_budget_limit_usd(),
            token_limit_without_output: default_token_limit_without_output(),
        }
    }
}

/// Quiet hours expressed as local hours of day; the window may wrap midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QuietHoursConfig {
    pub start_hour: u32,
    pub end_hour: u32,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".foreman/foreman.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for rotated log files.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}
