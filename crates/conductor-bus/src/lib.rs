//! # Conductor Bus
//!
//! Pub/sub plumbing for the orchestrator:
//!
//! - [`BusClient`] is the transport seam: publish bytes to a channel,
//!   subscribe to a channel and receive a message stream. The bus is
//!   fire-and-forget; anything published with no subscriber attached is
//!   gone, and every stronger guarantee is rebuilt above this crate by
//!   the state store and timeouts.
//! - [`RedisBusClient`] implements the trait over Redis pub/sub with
//!   per-subscription reconnect.
//! - [`InMemoryBus`] implements the same lossy semantics in memory for
//!   tests.
//! - [`CorrelationCoordinator`] turns the broadcast bus into
//!   request/response RPC keyed by correlation id.

pub mod client;
pub mod correlation;
pub mod memory;
pub mod redis;

pub use client::{BusClient, BusError, BusMessage, BusSubscription};
pub use correlation::{CorrelationConfig, CorrelationCoordinator, CorrelationError};
pub use memory::InMemoryBus;
pub use redis::RedisBusClient;
