use serde::{Deserialize, Serialize};

use super::cluster::ClusterSettings;

/// Main configuration structure for stratus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reconciliation loop configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Delete retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cloud endpoints managed by this process
    #[serde(default)]
    pub clusters: Vec<ClusterSettings>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation of log files: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Run a pass immediately when the daemon starts
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,

    /// Consecutive failed passes before the daemon gives up
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_run_on_startup() -> bool {
    true
}

const fn default_max_consecutive_failures() -> u32 {
    10
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_startup: default_run_on_startup(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Retry policy for instance deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Extra delete attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before a retry in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    1
}

const fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}
