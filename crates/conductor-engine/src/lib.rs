//! # Conductor Engine
//!
//! The orchestrator proper, assembled from the leaf crates:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │     (workflow-requests listener, response publishing)       │
//! └─────────────────────────────────────────────────────────────┘
//!                │                │                 │
//!                ▼                ▼                 ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ WorkflowExecutor │ │  TemplateStore   │ │ AiWorkflowGen    │
//! │  (DAG batches,   │ │  (YAML dir)      │ │ (capability-     │
//! │   retries, vars) │ │                  │ │  aware prompts)  │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!          │                                         │
//!          ▼                                         ▼
//! ┌──────────────────┐                    ┌──────────────────┐
//! │   TaskExecutor   │◄───────────────────│ CapabilityRegistry│
//! │ (per-type bus    │                    │ (announcements,  │
//! │  dispatch)       │                    │  staleness)      │
//! └──────────────────┘                    └──────────────────┘
//! ```
//!
//! A [`RecoveryManager`] runs alongside, repairing executions whose
//! owner died and garbage-collecting expired records.

pub mod config;
pub mod executor;
pub mod generator;
pub mod recovery;
pub mod registry;
pub mod server;
pub mod task;
pub mod templates;

pub use config::OrchestratorConfig;
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use generator::{AiWorkflowGenerator, GeneratorConfig, GeneratorError};
pub use recovery::{RecoveryConfig, RecoveryManager, RecoveryStats};
pub use registry::{CapabilityRegistry, RegistryConfig};
pub use server::Orchestrator;
pub use task::{TaskError, TaskExecutor, TaskExecutorConfig};
pub use templates::{TemplateError, TemplateStore};
