//! Application configuration.

use serde::Deserialize;

use crate::error::AppResult;

/// Serialization format for rendered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `COPYFLOW_`:
/// - `COPYFLOW_POOL_SIZE`: Number of replicated copy workers (default: 1)
/// - `COPYFLOW_REPLICA_TOKEN`: Token substituted with each worker's index (default: "{shard}")
/// - `COPYFLOW_TIMEOUT_SECONDS`: Wall-clock limit for the whole execution (default: 3600)
/// - `COPYFLOW_MAX_STATUS_CHECKS`: Status polls before an in-progress job is failed (default: 10)
/// - `COPYFLOW_RESOURCE_PREFIX`: Prefix for task resource identifiers (default: "copyflow")
/// - `COPYFLOW_OUTPUT_FORMAT`: `json` or `yaml` (default: json)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: i64,

    #[serde(default = "default_replica_token")]
    pub replica_token: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_status_checks")]
    pub max_status_checks: u32,

    /// Comment written at the top of rendered documents
    #[serde(default = "default_comment")]
    pub comment: String,

    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Upper bound on state transitions during a local dry run
    #[serde(default = "default_max_transitions")]
    pub max_transitions: usize,
}

fn default_pool_size() -> i64 {
    1
}

fn default_replica_token() -> String {
    "{shard}".to_string()
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_max_status_checks() -> u32 {
    10
}

fn default_comment() -> String {
    "Copy job orchestration".to_string()
}

fn default_resource_prefix() -> String {
    "copyflow".to_string()
}

fn default_max_transitions() -> usize {
    10_000
}

impl AppConfig {
    /// Load configuration from environment variables prefixed with `COPYFLOW_`.
    pub fn from_env() -> AppResult<Self> {
        Ok(envy::prefixed("COPYFLOW_").from_env::<AppConfig>()?)
    }

    /// Resource identifier for a task, e.g. `copyflow-schedule-copy`.
    pub fn resource_name(&self, task: &str) -> String {
        format!("{}-{}", self.resource_prefix, task)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            replica_token: default_replica_token(),
            timeout_seconds: default_timeout_seconds(),
            max_status_checks: default_max_status_checks(),
            comment: default_comment(),
            resource_prefix: default_resource_prefix(),
            output_format: OutputFormat::default(),
            max_transitions: default_max_transitions(),
        }
    }
}
