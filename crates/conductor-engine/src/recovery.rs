//! Crash recovery and record cleanup
//!
//! Two background loops over the state store:
//!
//! - **Recovery** walks the active set and repairs executions whose
//!   owner died: a run past the hard execution ceiling is failed
//!   outright; a run with stuck or silent tasks is resumed — each stuck
//!   task restored from its checkpoint or reset to pending. Recovery
//!   prepares state only; it never re-enqueues work itself.
//! - **Cleanup** drops records older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use conductor_core::{Status, WorkflowExecution};
use conductor_storage::{ExecutionStore, StoreError};

/// Recovery configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often the recovery loop runs; cleanup runs at 2x
    pub recovery_interval: Duration,

    /// Hard ceiling on total execution runtime
    pub max_execution_time: Duration,

    /// A task running/retrying longer than this is stuck
    pub max_task_time: Duration,

    /// No task activity inside this window counts as a stall
    pub activity_window: Duration,

    /// Stall detection only applies after this much runtime
    pub min_runtime_for_stall: Duration,

    /// Retention for execution records
    pub retention: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_interval: Duration::from_secs(60),
            max_execution_time: Duration::from_secs(4 * 60 * 60),
            max_task_time: Duration::from_secs(30 * 60),
            activity_window: Duration::from_secs(15 * 60),
            min_runtime_for_stall: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// What one recovery tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Active executions examined
    pub examined: usize,
    /// Executions failed for exceeding the runtime ceiling
    pub timed_out: usize,
    /// Executions with tasks reset or restored from checkpoints
    pub resumed: usize,
    /// Stale active-set entries with no backing record, removed
    pub orphaned: usize,
}

/// Background recovery and cleanup over the state store
pub struct RecoveryManager {
    store: Arc<dyn ExecutionStore>,
    config: RecoveryConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl RecoveryManager {
    /// Create a recovery manager
    pub fn new(store: Arc<dyn ExecutionStore>, config: RecoveryConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            shutdown_tx,
        }
    }

    /// Spawn the recovery and cleanup loops
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.recovery_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.run_recovery_tick().await {
                            warn!(error = %e, "recovery tick failed");
                        }
                    }
                }
            }
        });

        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.recovery_interval * 2);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.run_cleanup_tick().await {
                            warn!(error = %e, "cleanup tick failed");
                        }
                    }
                }
            }
        });

        info!("recovery manager started");
    }

    /// Stop both loops
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One pass over the active set
    #[instrument(skip(self))]
    pub async fn run_recovery_tick(&self) -> Result<RecoveryStats, StoreError> {
        let mut stats = RecoveryStats::default();

        for id in self.store.list_active().await? {
            stats.examined += 1;

            let mut execution = match self.store.load(&id).await {
                Ok(execution) => execution,
                Err(StoreError::NotFound(_)) => {
                    // Record expired under a stale active entry; a save
                    // with terminal status would have cleaned it, so we do
                    debug!(execution_id = %id, "orphaned active entry removed");
                    self.store.delete(&id).await?;
                    stats.orphaned += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let age = elapsed_since(execution.start_time);

            if execution.status == Status::Running && age > self.config.max_execution_time {
                warn!(
                    execution_id = %execution.id,
                    age_secs = age.as_secs(),
                    "execution exceeded runtime ceiling, failing"
                );
                for state in execution.task_states.values_mut() {
                    if state.status.is_active() {
                        state.mark_failed("execution_timeout");
                    }
                }
                execution.mark_failed("execution_timeout");
                self.store.save(&execution).await?;
                stats.timed_out += 1;
                continue;
            }

            if self.has_stuck_task(&execution) || self.is_stalled(&execution, age) {
                self.resume(&mut execution).await?;
                stats.resumed += 1;
            }
        }

        if stats != RecoveryStats::default() {
            info!(
                examined = stats.examined,
                timed_out = stats.timed_out,
                resumed = stats.resumed,
                orphaned = stats.orphaned,
                "recovery tick"
            );
        }
        Ok(stats)
    }

    /// One cleanup pass; returns how many records were removed
    #[instrument(skip(self))]
    pub async fn run_cleanup_tick(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        let removed = self.store.cleanup_before(cutoff).await?;
        if removed > 0 {
            info!(removed, "expired executions removed");
        }
        Ok(removed)
    }

    /// Any task running/retrying longer than the task ceiling?
    fn has_stuck_task(&self, execution: &WorkflowExecution) -> bool {
        execution.task_states.values().any(|state| {
            state.status.is_active()
                && state
                    .start_time
                    .map(|started| elapsed_since(started) > self.config.max_task_time)
                    .unwrap_or(true)
        })
    }

    /// Running long enough with no task activity in the window?
    fn is_stalled(&self, execution: &WorkflowExecution, age: Duration) -> bool {
        if execution.status != Status::Running || age < self.config.min_runtime_for_stall {
            return false;
        }
        match execution.last_task_activity() {
            Some(last) => elapsed_since(last) > self.config.activity_window,
            None => true,
        }
    }

    /// Resume strategy: restore each stuck task from its checkpoint, or
    /// reset it to pending, then mark the execution running again
    ///
    /// After this, no task remains running/retrying: every active task
    /// either took a non-running checkpoint or went back to pending.
    async fn resume(&self, execution: &mut WorkflowExecution) -> Result<(), StoreError> {
        let active: Vec<String> = execution.active_task_ids();

        for task_id in active {
            let checkpoint = self.store.load_checkpoint(&execution.id, &task_id).await?;
            let Some(state) = execution.task_states.get_mut(&task_id) else {
                continue;
            };

            match checkpoint {
                Some(checkpoint) if !checkpoint.status.is_active() => {
                    debug!(
                        execution_id = %execution.id,
                        task_id,
                        status = %checkpoint.status,
                        "task restored from checkpoint"
                    );
                    *state = checkpoint;
                }
                _ => {
                    debug!(execution_id = %execution.id, task_id, "task reset to pending");
                    state.reset_to_pending();
                }
            }
        }

        execution.status = Status::Running;
        execution.end_time = None;
        execution.error = None;
        self.store.save(execution).await?;

        info!(execution_id = %execution.id, "execution prepared for resume");
        Ok(())
    }
}

fn elapsed_since(instant: chrono::DateTime<Utc>) -> Duration {
    Utc::now()
        .signed_duration_since(instant)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use conductor_core::{TaskSpec, TaskState, TaskType, WorkflowDefinition};
    use conductor_storage::InMemoryExecutionStore;
    use serde_json::{json, Map};

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("w", "w")
            .with_task(TaskSpec::new("a", TaskType::Data).with_parameter("operation", json!("q")))
            .with_task(
                TaskSpec::new("b", TaskType::Data)
                    .with_parameter("operation", json!("q"))
                    .with_depends_on(["a"]),
            )
    }

    fn manager(store: Arc<InMemoryExecutionStore>) -> RecoveryManager {
        RecoveryManager::new(store, RecoveryConfig::default())
    }

    #[tokio::test]
    async fn test_healthy_execution_untouched() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        execution.task_states.get_mut("a").unwrap().mark_running();
        store.save(&execution).await.unwrap();

        let stats = manager.run_recovery_tick().await.unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.resumed, 0);
        assert_eq!(stats.timed_out, 0);

        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.task_states["a"].status, Status::Running);
    }

    #[tokio::test]
    async fn test_runtime_ceiling_fails_execution() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        execution.start_time = Utc::now() - ChronoDuration::hours(5);
        execution.task_states.get_mut("a").unwrap().mark_running();
        store.save(&execution).await.unwrap();

        let stats = manager.run_recovery_tick().await.unwrap();
        assert_eq!(stats.timed_out, 1);

        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.status, Status::Failed);
        assert_eq!(loaded.error.as_deref(), Some("execution_timeout"));
        assert_eq!(loaded.task_states["a"].status, Status::Failed);
        assert!(loaded.end_time.is_some());
        // No longer in the active set
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stuck_task_without_checkpoint_resets_to_pending() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        {
            let b = execution.task_states.get_mut("b").unwrap();
            b.status = Status::Running;
            b.start_time = Some(Utc::now() - ChronoDuration::hours(1));
        }
        store.save(&execution).await.unwrap();

        let stats = manager.run_recovery_tick().await.unwrap();
        assert_eq!(stats.resumed, 1);

        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.status, Status::Running);
        assert_eq!(loaded.task_states["b"].status, Status::Pending);
        assert!(loaded.task_states["b"].start_time.is_none());
    }

    #[tokio::test]
    async fn test_stuck_task_restores_from_checkpoint() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        {
            let a = execution.task_states.get_mut("a").unwrap();
            a.status = Status::Running;
            a.start_time = Some(Utc::now() - ChronoDuration::hours(1));
        }
        store.save(&execution).await.unwrap();

        // The worker had actually finished and checkpointed before dying
        let mut checkpoint = TaskState::new("a");
        let mut output = Map::new();
        output.insert("rows".to_string(), json!(3));
        checkpoint.mark_completed(output);
        store
            .save_checkpoint(&execution.id, "a", &checkpoint)
            .await
            .unwrap();

        manager.run_recovery_tick().await.unwrap();

        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.task_states["a"].status, Status::Completed);
        assert_eq!(loaded.task_states["a"].output["rows"], json!(3));
    }

    #[tokio::test]
    async fn test_running_checkpoint_is_not_restored() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        {
            let a = execution.task_states.get_mut("a").unwrap();
            a.status = Status::Running;
            a.start_time = Some(Utc::now() - ChronoDuration::hours(1));
        }
        store.save(&execution).await.unwrap();

        let mut checkpoint = TaskState::new("a");
        checkpoint.mark_running();
        store
            .save_checkpoint(&execution.id, "a", &checkpoint)
            .await
            .unwrap();

        manager.run_recovery_tick().await.unwrap();

        // A running checkpoint proves nothing; the task starts over
        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.task_states["a"].status, Status::Pending);

        // Invariant: nothing is left running or retrying after resume
        assert!(loaded
            .task_states
            .values()
            .all(|state| !state.status.is_active()));
    }

    #[tokio::test]
    async fn test_stalled_execution_is_resumed() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        // Running 40 minutes, no task ever started
        let mut execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        execution.start_time = Utc::now() - ChronoDuration::minutes(40);
        store.save(&execution).await.unwrap();

        let stats = manager.run_recovery_tick().await.unwrap();
        assert_eq!(stats.resumed, 1);

        let loaded = store.load(&execution.id).await.unwrap();
        assert_eq!(loaded.status, Status::Running);
    }

    #[tokio::test]
    async fn test_orphaned_active_entry_is_removed() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let execution = WorkflowExecution::new(&workflow(), Map::new(), None);
        store.save(&execution).await.unwrap();
        // Record expires by TTL; the active-set entry lingers
        store.expire_record(&execution.id);
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        let stats = manager.run_recovery_tick().await.unwrap();
        assert_eq!(stats.orphaned, 1);
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let manager = manager(store.clone());

        let mut old = WorkflowExecution::new(&workflow(), Map::new(), None);
        old.start_time = Utc::now() - ChronoDuration::days(8);
        old.mark_completed();
        let fresh = WorkflowExecution::new(&workflow(), Map::new(), None);
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();

        let removed = manager.run_cleanup_tick().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(&old.id).await.is_err());
        assert!(store.load(&fresh.id).await.is_ok());
    }
}
