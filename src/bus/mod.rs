//! Message bus for cross-instance delivery.
//!
//! This module contains:
//! - `MessageBus` trait: topic-based publish/subscribe over raw payloads
//! - Topic naming for per-instance delivery
//! - Implementations: Redis pub/sub, in-process channels
//!
//! The bus is fire-and-forget: a payload reaches the subscribers attached
//! at publish time and is never replayed. Durability lives in the store,
//! not here.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::info;

use crate::config::{BusConfig, BusKind, RedisConfig};

pub mod channel;
pub mod redis;

pub use channel::ChannelBus;
pub use redis::RedisBus;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// Stream of raw payloads received on a subscribed topic.
pub type MessageStream = BoxStream<'static, Result<Vec<u8>>>;

/// Topic prefix for per-instance delivery topics.
pub const MESSAGES_TOPIC_PREFIX: &str = "messages";

/// Topic a serving instance listens on for messages addressed to it.
///
/// Every publisher derives this the same way, so the instance identity is
/// the only coordination needed between senders and the instance's own
/// subscriber.
pub fn messages_topic(instance: &str) -> String {
    format!("{MESSAGES_TOPIC_PREFIX}.{instance}")
}

/// Interface for payload delivery between instances.
///
/// Implementations:
/// - `RedisBus`: Redis pub/sub
/// - `ChannelBus`: in-process broadcast channels for standalone mode
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic. Publishing to a topic nobody is
    /// subscribed to succeeds and the payload is dropped.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to a topic, receiving payloads published from now on in
    /// publish order.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream>;
}

/// Initialize the message bus selected by configuration.
pub async fn init_message_bus(
    config: &BusConfig,
    redis: &RedisConfig,
) -> Result<Arc<dyn MessageBus>> {
    match config.kind {
        BusKind::Redis => {
            let bus = RedisBus::new(&redis.url).await?;
            info!(bus = "redis", "Message bus initialized");
            Ok(Arc::new(bus))
        }
        BusKind::Channel => {
            info!(bus = "channel", "Message bus initialized");
            Ok(Arc::new(ChannelBus::new()))
        }
    }
}
