//! In-memory implementation of ExecutionStore for testing
//!
//! Same observable semantics as the Redis store — value copies out,
//! active-set membership tracks status, cleanup works off start times —
//! without the TTL clock (tests drive expiry through `cleanup_before`).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use conductor_core::{TaskState, WorkflowExecution};

use super::store::{ExecutionStore, StoreError};

/// In-memory execution store
///
/// # Example
///
/// ```
/// use conductor_storage::InMemoryExecutionStore;
///
/// let store = InMemoryExecutionStore::new();
/// ```
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<String, WorkflowExecution>>,
    active: RwLock<HashSet<String>>,
    checkpoints: RwLock<HashMap<(String, String), TaskState>>,
}

impl InMemoryExecutionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.records.write().clear();
        self.active.write().clear();
        self.checkpoints.write().clear();
    }

    /// Drop only the record, leaving any active-set entry behind
    ///
    /// Simulates a TTL expiry for recovery tests; Redis expires the
    /// record key independently of set membership.
    pub fn expire_record(&self, id: &str) {
        self.records.write().remove(id);
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let mut active = self.active.write();

        records.insert(execution.id.clone(), execution.clone());
        if execution.status.is_active() {
            active.insert(execution.id.clone());
        } else {
            active.remove(&execution.id);
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<WorkflowExecution, StoreError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().remove(id);
        self.active.write().remove(id);
        self.checkpoints
            .write()
            .retain(|(execution_id, _), _| execution_id != id);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.active.read().iter().cloned().collect())
    }

    async fn list_by_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let records = self.records.read();
        let mut ids: Vec<(DateTime<Utc>, String)> = records
            .values()
            .filter(|execution| execution.start_time >= start && execution.start_time <= end)
            .map(|execution| (execution.start_time, execution.id.clone()))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.write();
        let mut active = self.active.write();
        let mut checkpoints = self.checkpoints.write();

        let expired: Vec<String> = records
            .values()
            .filter(|execution| execution.start_time < cutoff)
            .map(|execution| execution.id.clone())
            .collect();

        for id in &expired {
            records.remove(id);
            active.remove(id);
            checkpoints.retain(|(execution_id, _), _| execution_id != id);
        }
        Ok(expired.len() as u64)
    }

    async fn save_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
        state: &TaskState,
    ) -> Result<(), StoreError> {
        self.checkpoints.write().insert(
            (execution_id.to_string(), task_id.to_string()),
            state.clone(),
        );
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        execution_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskState>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .get(&(execution_id.to_string(), task_id.to_string()))
            .cloned())
    }
}
