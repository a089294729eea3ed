//! BusClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Could not reach the broker
    #[error("bus connection error: {0}")]
    Connection(String),

    /// A publish did not go through
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    /// A subscription could not be established
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    /// Payload could not be serialized
    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One message received from a subscription
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// A live subscription to one channel
///
/// The stream ends (recv returns `None`) when the client shuts down or
/// the subscription is dropped broker-side for good.
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    /// How many messages a subscription buffers before the bus starts
    /// dropping for that subscriber. Pub/sub has no backpressure to the
    /// publisher, so a slow consumer loses messages rather than
    /// stalling the bus.
    pub const BUFFER: usize = 256;

    pub(crate) fn new(receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { receiver }
    }

    /// Receive the next message, or `None` once the stream ends
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe transport
///
/// Implementations must be cheap to share (`Arc`) and safe to publish
/// from many tasks at once.
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    /// Publish raw bytes to a channel
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError>;

    /// Publish a JSON value
    async fn publish_json(&self, channel: &str, value: &serde_json::Value) -> Result<(), BusError> {
        let payload = serde_json::to_vec(value)?;
        self.publish(channel, payload).await
    }
}
