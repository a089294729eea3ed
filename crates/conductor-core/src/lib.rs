//! # Conductor Core
//!
//! Domain model for the workflow orchestrator:
//!
//! - **Definitions**: [`WorkflowDefinition`] and [`TaskSpec`] describe the
//!   static plan — tasks, dependencies, retry policies.
//! - **Executions**: [`WorkflowExecution`] and [`TaskState`] are the running
//!   instance persisted to the state store.
//! - **DAG**: [`TaskDag`] validates the dependency graph and partitions it
//!   into parallel batches.
//! - **Interpolation**: [`Scope`] resolves `${name}` placeholders in task
//!   parameters against workflow variables and upstream task outputs.
//! - **Conditions**: a small boolean expression language for `condition`
//!   tasks.
//!
//! Nothing in this crate touches the bus or the state store; it is pure
//! data and algorithms, exercised directly by unit tests.

pub mod condition;
pub mod dag;
pub mod execution;
pub mod interpolate;
pub mod model;
pub mod retry;
pub mod template;

pub use condition::{evaluate, ConditionError};
pub use dag::{DagError, TaskDag};
pub use execution::{Status, TaskState, WorkflowExecution};
pub use interpolate::Scope;
pub use model::{TaskSpec, TaskType, ValidationError, WorkflowDefinition};
pub use retry::{BackoffKind, RetryPolicy};
pub use template::{Template, TemplateVariable};
