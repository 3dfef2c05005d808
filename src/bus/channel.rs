//! In-memory channel-based message bus for standalone mode.
//!
//! Uses one tokio broadcast channel per topic. Useful for local
//! development and testing without external dependencies.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{MessageBus, MessageStream, Result};

/// Channel capacity per topic.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process message bus using tokio broadcast channels.
///
/// Topics are created lazily on first publish or subscribe. A slow
/// subscriber that falls more than the channel capacity behind loses the
/// overwritten payloads.
#[derive(Default)]
pub struct ChannelBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let sender = self.sender(topic).await;
        match sender.send(payload.to_vec()) {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "Published payload to channel");
            }
            Err(_) => {
                // No receivers, that's okay for publish-only scenarios
                debug!(topic = %topic, "Published payload (no receivers)");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream> {
        let receiver = self.sender(topic).await.subscribe();
        let topic_name = topic.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |result| match result {
            Ok(payload) => Some(Ok(payload)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(topic = %topic_name, skipped, "Subscriber lagged, skipped payloads");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
