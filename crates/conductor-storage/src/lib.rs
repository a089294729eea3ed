//! # Conductor Storage
//!
//! Execution persistence for the orchestrator. The bus forgets every
//! message the moment it is published; this crate is where reliability
//! is rebuilt. Each execution is stored as a JSON record with a TTL,
//! indexed two ways for recovery: a set of active ids and a sorted set
//! scored by start time. Per-task checkpoints give the recovery manager
//! a resume point that survives an orchestrator crash.
//!
//! [`ExecutionStore`] is the seam; [`RedisExecutionStore`] is the real
//! backend and [`InMemoryExecutionStore`] the test twin with the same
//! semantics.

pub mod memory;
pub mod redis;
pub mod store;

pub use memory::InMemoryExecutionStore;
pub use redis::RedisExecutionStore;
pub use store::{ExecutionStore, StoreConfig, StoreError};
