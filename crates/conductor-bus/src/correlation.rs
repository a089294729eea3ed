//! Request/response correlation over the broadcast bus
//!
//! The bus is broadcast and asynchronous; this module rebuilds RPC on
//! top of it. Every outbound request carries a correlation id; a
//! listener per response channel routes inbound responses back to the
//! registered caller. Delivery is non-blocking: a full or vanished
//! receiver never stalls the listener, and responses nobody is waiting
//! for are dropped with a log line.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use conductor_contracts::{ServiceKind, ServiceResponse};

use super::client::{BusClient, BusError};

/// Error type for coordinated calls
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// Transport failure
    #[error(transparent)]
    Bus(#[from] BusError),

    /// No response inside the deadline
    #[error("request to {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// The coordinator shut down while the call was in flight
    #[error("correlation coordinator shut down")]
    Shutdown,

    /// Another call is already using this correlation id
    #[error("correlation id already in flight: {0}")]
    DuplicateCorrelation(String),

    /// Request payloads must be JSON objects
    #[error("request payload must be a JSON object")]
    InvalidPayload,

    /// Payload could not be serialized
    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Deadline applied when the caller passes none
    pub default_timeout: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl CorrelationConfig {
    /// Set the default call timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

type PendingMap = Mutex<HashMap<String, mpsc::Sender<ServiceResponse>>>;

/// Routes bus responses back to their callers by correlation id
///
/// # Example
///
/// ```ignore
/// let coordinator = CorrelationCoordinator::new(bus, CorrelationConfig::default());
/// coordinator.start().await?;
///
/// let response = coordinator
///     .call(ServiceKind::Data, request, Duration::from_secs(10))
///     .await?;
/// ```
pub struct CorrelationCoordinator {
    bus: Arc<dyn BusClient>,
    config: CorrelationConfig,
    pending: Arc<PendingMap>,
    shutdown_tx: watch::Sender<bool>,
    started: Mutex<bool>,
}

impl CorrelationCoordinator {
    /// Create a coordinator over the given bus
    pub fn new(bus: Arc<dyn BusClient>, config: CorrelationConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            started: Mutex::new(false),
        }
    }

    /// Start one listener per service response channel
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn start(&self) -> Result<(), BusError> {
        {
            let mut started = self.started.lock();
            if *started {
                return Ok(());
            }
            *started = true;
        }

        for kind in ServiceKind::ALL {
            let channel = kind.response_channel();
            let mut subscription = self.bus.subscribe(channel).await?;
            let pending = Arc::clone(&self.pending);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            debug!(channel, "response listener shutting down");
                            return;
                        }
                        message = subscription.recv() => {
                            match message {
                                Some(message) => route_response(&pending, channel, &message.payload),
                                None => {
                                    debug!(channel, "response stream ended");
                                    return;
                                }
                            }
                        }
                    }
                }
            });
            info!(channel, "response listener started");
        }

        Ok(())
    }

    /// Stop the listeners and unblock every pending caller
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        // Dropping the senders closes each caller's receive slot
        self.pending.lock().clear();
    }

    /// Send a request and await its matching response
    ///
    /// A missing `correlation_id` field is filled with a fresh v7 UUID.
    /// The pending entry is removed on every exit path, so a response
    /// arriving after a timeout finds nobody and is dropped.
    #[instrument(skip(self, payload), fields(service = %service))]
    pub async fn call(
        &self,
        service: ServiceKind,
        mut payload: Value,
        timeout: Duration,
    ) -> Result<ServiceResponse, CorrelationError> {
        let correlation_id = ensure_correlation_id(&mut payload)?;
        let timeout = if timeout.is_zero() {
            self.config.default_timeout
        } else {
            timeout
        };

        let (tx, mut rx) = mpsc::channel(1);
        self.register(&correlation_id, tx)?;
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            correlation_id: correlation_id.clone(),
        };

        self.bus
            .publish(service.request_channel(), serde_json::to_vec(&payload)?)
            .await?;
        debug!(%correlation_id, "request published");

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(CorrelationError::Shutdown),
            Err(_) => Err(CorrelationError::Timeout {
                service: service.to_string(),
                timeout,
            }),
        }
    }

    /// Publish to every service request channel and gather responses
    ///
    /// Returns the collected responses and whether the set is partial
    /// (deadline hit before `expected` arrived).
    #[instrument(skip(self, payload))]
    pub async fn broadcast(
        &self,
        mut payload: Value,
        expected: usize,
        timeout: Duration,
    ) -> Result<(Vec<ServiceResponse>, bool), CorrelationError> {
        let correlation_id = ensure_correlation_id(&mut payload)?;
        let timeout = if timeout.is_zero() {
            self.config.default_timeout
        } else {
            timeout
        };

        let (tx, mut rx) = mpsc::channel(expected.max(1));
        self.register(&correlation_id, tx)?;
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            correlation_id: correlation_id.clone(),
        };

        let bytes = serde_json::to_vec(&payload)?;
        let mut published = 0usize;
        for kind in ServiceKind::ALL {
            match self.bus.publish(kind.request_channel(), bytes.clone()).await {
                Ok(()) => published += 1,
                Err(e) => warn!(service = %kind, error = %e, "broadcast publish failed"),
            }
        }
        if published == 0 {
            return Err(CorrelationError::Bus(BusError::Publish {
                channel: "broadcast".to_string(),
                reason: "no service channel accepted the request".to_string(),
            }));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut responses = Vec::new();
        while responses.len() < expected {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => return Err(CorrelationError::Shutdown),
                Err(_) => return Ok((responses, true)),
            }
        }
        Ok((responses, false))
    }

    /// Fire-and-forget: publish without registering a receiver
    pub async fn send_async(
        &self,
        service: ServiceKind,
        mut payload: Value,
    ) -> Result<String, CorrelationError> {
        let correlation_id = ensure_correlation_id(&mut payload)?;
        self.bus
            .publish(service.request_channel(), serde_json::to_vec(&payload)?)
            .await?;
        Ok(correlation_id)
    }

    /// Number of calls currently awaiting responses
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    fn register(
        &self,
        correlation_id: &str,
        tx: mpsc::Sender<ServiceResponse>,
    ) -> Result<(), CorrelationError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(correlation_id) {
            return Err(CorrelationError::DuplicateCorrelation(
                correlation_id.to_string(),
            ));
        }
        pending.insert(correlation_id.to_string(), tx);
        Ok(())
    }
}

/// Removes the pending entry on every exit path, including panics and
/// caller-side cancellation
struct PendingGuard {
    pending: Arc<PendingMap>,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.correlation_id);
    }
}

fn ensure_correlation_id(payload: &mut Value) -> Result<String, CorrelationError> {
    let object = payload
        .as_object_mut()
        .ok_or(CorrelationError::InvalidPayload)?;

    match object.get("correlation_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => {
            let id = Uuid::now_v7().to_string();
            object.insert("correlation_id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

fn route_response(pending: &PendingMap, channel: &str, payload: &[u8]) {
    let response: ServiceResponse = match serde_json::from_slice(payload) {
        Ok(response) => response,
        Err(e) => {
            debug!(channel, error = %e, "undecodable response payload, dropping");
            return;
        }
    };

    let tx = {
        let map = pending.lock();
        map.get(&response.correlation_id).cloned()
    };

    match tx {
        Some(tx) => {
            let correlation_id = response.correlation_id.clone();
            if let Err(e) = tx.try_send(response) {
                // Never block the listener; a missed delivery is logged
                warn!(channel, %correlation_id, error = %e, "receiver unavailable, dropping response");
            }
        }
        None => {
            debug!(
                channel,
                correlation_id = %response.correlation_id,
                "response with no pending caller, dropping"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use conductor_contracts::channels;
    use serde_json::json;

    async fn coordinator_with_bus() -> (Arc<InMemoryBus>, Arc<CorrelationCoordinator>) {
        let bus = Arc::new(InMemoryBus::new());
        let coordinator = Arc::new(CorrelationCoordinator::new(
            bus.clone(),
            CorrelationConfig::default(),
        ));
        coordinator.start().await.expect("should start");
        (bus, coordinator)
    }

    /// Echo worker: replies to every data request with its own id and a tag
    async fn spawn_echo_worker(bus: Arc<InMemoryBus>, tag: &'static str) {
        let mut requests = bus.subscribe(channels::DATA_REQUESTS).await.unwrap();
        tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                let request: Value = serde_json::from_slice(&message.payload).unwrap();
                let correlation_id = request["correlation_id"].as_str().unwrap();
                let response = ServiceResponse::ok(correlation_id, {
                    let mut body = serde_json::Map::new();
                    body.insert("data".to_string(), json!({"tag": tag}));
                    body
                });
                let payload = serde_json::to_vec(&response).unwrap();
                bus.publish(channels::DATA_RESPONSES, payload).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (bus, coordinator) = coordinator_with_bus().await;
        spawn_echo_worker(bus, "echo").await;

        let response = coordinator
            .call(
                ServiceKind::Data,
                json!({"operation": "query"}),
                Duration::from_secs(1),
            )
            .await
            .expect("should get response");

        assert!(response.success);
        assert_eq!(response.data().unwrap()["tag"], "echo");
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_existing_correlation_id_is_kept() {
        let (bus, coordinator) = coordinator_with_bus().await;
        let mut requests = bus.subscribe(channels::DATA_REQUESTS).await.unwrap();

        let call = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .call(
                        ServiceKind::Data,
                        json!({"correlation_id": "fixed-id", "operation": "q"}),
                        Duration::from_secs(1),
                    )
                    .await
            })
        };

        let published = requests.recv().await.unwrap();
        let request: Value = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(request["correlation_id"], "fixed-id");

        let response = ServiceResponse::ok("fixed-id", serde_json::Map::new());
        bus.publish(
            channels::DATA_RESPONSES,
            serde_json::to_vec(&response).unwrap(),
        )
        .await
        .unwrap();

        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_isolated() {
        let (bus, coordinator) = coordinator_with_bus().await;

        // Worker that answers out of order: second request first
        let mut requests = bus.subscribe(channels::DATA_REQUESTS).await.unwrap();
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                let first: Value =
                    serde_json::from_slice(&requests.recv().await.unwrap().payload).unwrap();
                let second: Value =
                    serde_json::from_slice(&requests.recv().await.unwrap().payload).unwrap();

                for request in [second, first] {
                    let id = request["correlation_id"].as_str().unwrap();
                    let mut body = serde_json::Map::new();
                    body.insert("data".to_string(), json!({"echo": request["n"]}));
                    let response = ServiceResponse::ok(id, body);
                    bus.publish(
                        channels::DATA_RESPONSES,
                        serde_json::to_vec(&response).unwrap(),
                    )
                    .await
                    .unwrap();
                }
            });
        }

        let one = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .call(ServiceKind::Data, json!({"n": 1}), Duration::from_secs(1))
                    .await
            })
        };
        // Give the first call a moment to publish so ordering is stable
        tokio::time::sleep(Duration::from_millis(20)).await;
        let two = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .call(ServiceKind::Data, json!({"n": 2}), Duration::from_secs(1))
                    .await
            })
        };

        let first = one.await.unwrap().expect("first call should succeed");
        let second = two.await.unwrap().expect("second call should succeed");

        assert_eq!(first.data().unwrap()["echo"], 1);
        assert_eq!(second.data().unwrap()["echo"], 2);
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (_bus, coordinator) = coordinator_with_bus().await;

        let result = coordinator
            .call(
                ServiceKind::Data,
                json!({"operation": "q"}),
                Duration::from_millis(50),
            )
            .await;

        assert!(matches!(result, Err(CorrelationError::Timeout { .. })));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let (bus, coordinator) = coordinator_with_bus().await;

        let result = coordinator
            .call(
                ServiceKind::Data,
                json!({"correlation_id": "late-1"}),
                Duration::from_millis(30),
            )
            .await;
        assert!(result.is_err());

        // Response arrives after the caller gave up: routed nowhere, no panic
        let response = ServiceResponse::ok("late-1", serde_json::Map::new());
        bus.publish(
            channels::DATA_RESPONSES,
            serde_json::to_vec(&response).unwrap(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_correlation_id_rejected() {
        let (_bus, coordinator) = coordinator_with_bus().await;

        let blocked = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .call(
                        ServiceKind::Data,
                        json!({"correlation_id": "dup"}),
                        Duration::from_millis(200),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = coordinator
            .call(
                ServiceKind::Data,
                json!({"correlation_id": "dup"}),
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(
            result,
            Err(CorrelationError::DuplicateCorrelation(id)) if id == "dup"
        ));

        let _ = blocked.await;
    }

    #[tokio::test]
    async fn test_broadcast_partial_on_timeout() {
        let (bus, coordinator) = coordinator_with_bus().await;

        // Only the data worker answers; ai and exec stay silent
        let mut requests = bus.subscribe(channels::DATA_REQUESTS).await.unwrap();
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while let Some(message) = requests.recv().await {
                    let request: Value = serde_json::from_slice(&message.payload).unwrap();
                    let id = request["correlation_id"].as_str().unwrap();
                    let response = ServiceResponse::ok(id, serde_json::Map::new());
                    bus.publish(
                        channels::DATA_RESPONSES,
                        serde_json::to_vec(&response).unwrap(),
                    )
                    .await
                    .unwrap();
                }
            });
        }

        let (responses, partial) = coordinator
            .broadcast(json!({"ping": true}), 3, Duration::from_millis(100))
            .await
            .expect("broadcast should not error");

        assert_eq!(responses.len(), 1);
        assert!(partial);
    }

    #[tokio::test]
    async fn test_send_async_registers_nothing() {
        let (bus, coordinator) = coordinator_with_bus().await;
        let mut requests = bus.subscribe(channels::AI_REQUESTS).await.unwrap();

        let id = coordinator
            .send_async(ServiceKind::Ai, json!({"prompt": "hi"}))
            .await
            .expect("should publish");

        let message = requests.recv().await.unwrap();
        let request: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(request["correlation_id"].as_str().unwrap(), id);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stop_unblocks_pending_callers() {
        let (_bus, coordinator) = coordinator_with_bus().await;

        let call = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .call(
                        ServiceKind::Data,
                        json!({"operation": "q"}),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.stop();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(CorrelationError::Shutdown)));
    }

    #[tokio::test]
    async fn test_non_object_payload_rejected() {
        let (_bus, coordinator) = coordinator_with_bus().await;
        let result = coordinator
            .call(
                ServiceKind::Data,
                json!("not an object"),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(CorrelationError::InvalidPayload)));
    }
}
