//! Orchestrator configuration
//!
//! Everything is environment-driven with working defaults, so a bare
//! `conductor` against a local Redis comes up without any setup.

use std::time::Duration;

/// Top-level configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Redis URL for both the bus and the state store
    pub redis_url: String,

    /// Directory of YAML workflow templates
    pub template_dir: String,

    /// Global cap on concurrently running tasks
    pub max_concurrent: usize,

    /// Deadline for workflows that declare none
    pub default_workflow_timeout: Duration,

    /// Deadline for tasks that declare none
    pub default_task_timeout: Duration,

    /// Execution record TTL in the state store
    pub execution_ttl: Duration,

    /// How often the recovery loop runs (cleanup runs at 2x)
    pub recovery_interval: Duration,

    /// A workflow running longer than this is failed outright
    pub max_execution_time: Duration,

    /// A task running longer than this triggers a resume
    pub max_task_time: Duration,

    /// No task activity inside this window counts as a stall
    pub activity_window: Duration,

    /// Retention for finished execution records
    pub retention: Duration,

    /// Capability records older than this are unavailable
    pub capability_stale_threshold: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            template_dir: "templates".to_string(),
            max_concurrent: 5,
            default_workflow_timeout: Duration::from_secs(60 * 60),
            default_task_timeout: Duration::from_secs(5 * 60),
            execution_ttl: Duration::from_secs(24 * 60 * 60),
            recovery_interval: Duration::from_secs(60),
            max_execution_time: Duration::from_secs(4 * 60 * 60),
            max_task_time: Duration::from_secs(30 * 60),
            activity_window: Duration::from_secs(15 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            capability_stale_threshold: Duration::from_secs(15 * 60),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_string("REDIS_URL", &defaults.redis_url),
            template_dir: env_string("TEMPLATE_DIR", &defaults.template_dir),
            max_concurrent: env_parse("MAX_CONCURRENT", defaults.max_concurrent),
            default_workflow_timeout: env_duration(
                "DEFAULT_WORKFLOW_TIMEOUT_SECS",
                defaults.default_workflow_timeout,
            ),
            default_task_timeout: env_duration(
                "DEFAULT_TASK_TIMEOUT_SECS",
                defaults.default_task_timeout,
            ),
            execution_ttl: env_duration("EXECUTION_TTL_SECS", defaults.execution_ttl),
            recovery_interval: env_duration("RECOVERY_INTERVAL_SECS", defaults.recovery_interval),
            max_execution_time: env_duration(
                "MAX_EXECUTION_TIME_SECS",
                defaults.max_execution_time,
            ),
            max_task_time: env_duration("MAX_TASK_TIME_SECS", defaults.max_task_time),
            activity_window: env_duration("ACTIVITY_WINDOW_SECS", defaults.activity_window),
            retention: env_duration("RETENTION_SECS", defaults.retention),
            capability_stale_threshold: env_duration(
                "CAPABILITY_STALE_SECS",
                defaults.capability_stale_threshold,
            ),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_duration(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
