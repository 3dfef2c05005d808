//! Redis pub/sub message bus.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use super::{BusError, MessageBus, MessageStream, Result};

/// Message bus backed by Redis pub/sub channels.
///
/// Publishing reuses one multiplexed connection; each subscription takes a
/// dedicated connection, as Redis requires for subscriber mode.
pub struct RedisBus {
    client: Client,
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn new(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to Redis message bus");
        let client = Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        debug!(
            topic = %topic,
            receivers,
            bytes = payload.len(),
            "Published payload"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        info!(topic = %topic, "Subscribed to topic");

        let stream = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<Vec<u8>>()
                .map_err(|e| BusError::Subscribe(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}
