//! Redis implementation of ExecutionStore
//!
//! Layout per execution id `E` under the configured prefix:
//!
//! - `<p>:execution:<E>` — JSON [`WorkflowExecution`], TTL-bounded
//! - `<p>:active` — set of ids whose status is running/retrying
//! - `<p>:index` — sorted set scored by start-time Unix seconds
//! - `<p>:checkpoint:<E>:<T>` — JSON [`TaskState`] per task
//!
//! Every `save` runs one MULTI/EXEC pipeline so the record and both
//! indexes move together. Checkpoints expire on their own TTL; cleanup
//! only has to chase records and index entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use conductor_core::{TaskState, WorkflowExecution};

use super::store::{ExecutionStore, StoreConfig, StoreError};

/// Redis-backed execution store
pub struct RedisExecutionStore {
    manager: ConnectionManager,
    config: StoreConfig,
}

impl RedisExecutionStore {
    /// Connect to Redis with the given configuration
    pub async fn connect(url: &str, config: StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let manager = ConnectionManager::new(client).await.map_err(backend)?;
        info!(url, prefix = %config.key_prefix, "connected to redis store");
        Ok(Self { manager, config })
    }

    /// Build a store over an existing connection manager
    pub fn with_manager(manager: ConnectionManager, config: StoreConfig) -> Self {
        Self { manager, config }
    }

    fn execution_key(&self, id: &str) -> String {
        format!("{}:execution:{}", self.config.key_prefix, id)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.config.key_prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.config.key_prefix)
    }

    fn checkpoint_key(&self, execution_id: &str, task_id: &str) -> String {
        format!(
            "{}:checkpoint:{}:{}",
            self.config.key_prefix, execution_id, task_id
        )
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ExecutionStore for RedisExecutionStore {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let record = serde_json::to_string(execution)?;
        let score = execution.start_time.timestamp();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set_ex(
            self.execution_key(&execution.id),
            record,
            self.config.execution_ttl.as_secs(),
        )
        .ignore();

        if execution.status.is_active() {
            pipe.sadd(self.active_key(), &execution.id).ignore();
        } else {
            pipe.srem(self.active_key(), &execution.id).ignore();
        }

        pipe.zadd(self.index_key(), &execution.id, score).ignore();
        pipe.expire(self.index_key(), self.config.index_ttl.as_secs() as i64)
            .ignore();

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(backend)?;

        debug!(execution_id = %execution.id, status = %execution.status, "execution saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<WorkflowExecution, StoreError> {
        let mut conn = self.manager.clone();
        let record: Option<String> = conn
            .get(self.execution_key(id))
            .await
            .map_err(backend)?;

        match record {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.execution_key(id)).ignore();
        pipe.srem(self.active_key(), id).ignore();
        pipe.zrem(self.index_key(), id).ignore();

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(backend)?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        conn.smembers(self.active_key()).await.map_err(backend)
    }

    async fn list_by_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        conn.zrangebyscore(self.index_key(), start.timestamp(), end.timestamp())
            .await
            .map_err(backend)
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();
        let expired: Vec<String> = conn
            .zrangebyscore(self.index_key(), "-inf", cutoff.timestamp())
            .await
            .map_err(backend)?;

        if expired.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &expired {
            pipe.del(self.execution_key(id)).ignore();
            pipe.srem(self.active_key(), id).ignore();
        }
        pipe.zrembyscore(self.index_key(), "-inf", cutoff.timestamp())
            .ignore();

        let _: () = pipe.query_async(&mut conn).await.map_err(backend)?;

        info!(count = expired.len(), "expired executions cleaned up");
        Ok(expired.len() as u64)
    }

    async fn save_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
        state: &TaskState,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_string(state)?;
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(
                self.checkpoint_key(execution_id, task_id),
                record,
                self.config.execution_ttl.as_secs(),
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskState>, StoreError> {
        let mut conn = self.manager.clone();
        let record: Option<String> = conn
            .get(self.checkpoint_key(execution_id, task_id))
            .await
            .map_err(backend)?;

        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
