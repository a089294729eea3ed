//! Redis pub/sub implementation of BusClient
//!
//! Publishing goes through a shared [`ConnectionManager`], which handles
//! its own reconnection. Each subscription runs a dedicated reader task
//! holding a pub/sub connection; when that connection drops, the task
//! reconnects with capped backoff and re-subscribes. Messages published
//! while disconnected are lost — that is the bus contract, and the state
//! store plus timeouts recover from it.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{BusClient, BusError, BusMessage, BusSubscription};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Redis-backed bus client
///
/// # Example
///
/// ```ignore
/// use conductor_bus::RedisBusClient;
///
/// let bus = RedisBusClient::connect("redis://127.0.0.1:6379").await?;
/// bus.publish("data-requests", payload).await?;
/// ```
pub struct RedisBusClient {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBusClient {
    /// Connect to Redis and prepare the shared publish connection
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(url, "connected to redis bus");
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl BusClient for RedisBusClient {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        let (tx, rx) = mpsc::channel(BusSubscription::BUFFER);
        let client = self.client.clone();
        let channel = channel.to_string();

        // Fail fast if the first subscribe does not succeed; afterwards
        // the reader task owns reconnection.
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe {
                channel: channel.clone(),
                reason: e.to_string(),
            })?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| BusError::Subscribe {
                channel: channel.clone(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            let mut delay = INITIAL_RECONNECT_DELAY;
            let mut current = Some(pubsub);

            loop {
                let mut pubsub = match current.take() {
                    Some(pubsub) => pubsub,
                    None => match client.get_async_pubsub().await {
                        Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                            Ok(()) => {
                                info!(channel, "re-subscribed after reconnect");
                                delay = INITIAL_RECONNECT_DELAY;
                                pubsub
                            }
                            Err(e) => {
                                warn!(channel, error = %e, "re-subscribe failed, backing off");
                                tokio::time::sleep(delay).await;
                                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                                continue;
                            }
                        },
                        Err(e) => {
                            warn!(channel, error = %e, "pubsub reconnect failed, backing off");
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                            continue;
                        }
                    },
                };

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let message = BusMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload: msg.get_payload_bytes().to_vec(),
                    };
                    if tx.try_send(message).is_err() {
                        if tx.is_closed() {
                            debug!(channel, "subscriber dropped, stopping reader");
                            return;
                        }
                        warn!(channel, "subscriber buffer full, dropping message");
                    }
                }

                if tx.is_closed() {
                    debug!(channel, "subscriber dropped, stopping reader");
                    return;
                }
                warn!(channel, "pubsub stream ended, reconnecting");
            }
        });

        Ok(BusSubscription::new(rx))
    }
}
