//! ExecutionStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conductor_core::{TaskState, WorkflowExecution};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record under that execution id
    #[error("execution not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix for every key written
    pub key_prefix: String,

    /// How long an execution record (and its checkpoints) lives
    pub execution_ttl: Duration,

    /// How long the time index lives; kept longer than the records so
    /// recovery can still see what expired recently
    pub index_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let execution_ttl = Duration::from_secs(24 * 60 * 60);
        Self {
            key_prefix: "orchestrator".to_string(),
            execution_ttl,
            index_ttl: execution_ttl * 2,
        }
    }
}

impl StoreConfig {
    /// Set the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the execution record TTL (index TTL follows at 2x)
    pub fn with_execution_ttl(mut self, ttl: Duration) -> Self {
        self.execution_ttl = ttl;
        self.index_ttl = ttl * 2;
        self
    }
}

/// Persistence for workflow executions and task checkpoints
///
/// Implementations hand out value copies; no shared mutable state ever
/// crosses this boundary. `save` must move the record and both indexes
/// together — all writes or none.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Persist an execution snapshot, keeping the active set and time
    /// index consistent with its status
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Load an execution by id
    async fn load(&self, id: &str) -> Result<WorkflowExecution, StoreError>;

    /// Remove an execution record and its index memberships
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Ids currently marked active (running or retrying)
    async fn list_active(&self) -> Result<Vec<String>, StoreError>;

    /// Ids whose start time falls inside the given range
    async fn list_by_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    /// Drop records and index entries older than the cutoff; returns
    /// how many records were removed
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Persist a task checkpoint
    async fn save_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
        state: &TaskState,
    ) -> Result<(), StoreError>;

    /// Load a task checkpoint, if one exists
    async fn load_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskState>, StoreError>;
}
