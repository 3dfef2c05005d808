//! Streamer service.
//!
//! Holds one long-lived stream per connected client: subscribes to this
//! instance's delivery topic, registers the client's presence, and
//! forwards each payload in receipt order until the client goes away.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use prost::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::bus::{messages_topic, MessageBus, MessageStream};
use crate::proto::streamer_server::Streamer;
use crate::proto::{Message as WireMessage, ReceiveMessagesRequest};
use crate::registry::ConnectionRegistry;
use crate::validation::validate_identity;

/// Streamer service.
///
/// Presence lasts exactly as long as the stream: registered after the
/// topic subscription is open, unregistered when the forwarding task
/// ends. There is no replay: a reconnecting client sees only payloads
/// published after it resubscribed.
pub struct StreamerService {
    registry: Arc<dyn ConnectionRegistry>,
    bus: Arc<dyn MessageBus>,
    instance: String,
    presence_ttl: Duration,
}

impl StreamerService {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        bus: Arc<dyn MessageBus>,
        instance: impl Into<String>,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            bus,
            instance: instance.into(),
            presence_ttl,
        }
    }
}

#[tonic::async_trait]
impl Streamer for StreamerService {
    type ReceiveMessagesStream = Pin<Box<dyn Stream<Item = Result<WireMessage, Status>> + Send>>;

    async fn receive_messages(
        &self,
        request: Request<ReceiveMessagesRequest>,
    ) -> Result<Response<Self::ReceiveMessagesStream>, Status> {
        let req = request.into_inner();
        validate_identity(&req.user)?;
        let user = req.user;

        // Subscribe before registering so nothing routed here on the
        // strength of the registration can slip past the subscription.
        let topic = messages_topic(&self.instance);
        let subscription = self.bus.subscribe(&topic).await.map_err(|e| {
            error!(topic = %topic, error = %e, "Failed to subscribe to delivery topic");
            Status::unavailable(format!("Message bus unavailable: {e}"))
        })?;

        self.registry
            .register(&user, &self.instance, self.presence_ttl)
            .await
            .map_err(|e| {
                error!(user = %user, error = %e, "Failed to register connection");
                Status::unavailable(format!("Connection registry unavailable: {e}"))
            })?;

        info!(user = %user, instance = %self.instance, "Client connected");

        let (tx, rx) = mpsc::channel(32);
        let registry = Arc::clone(&self.registry);
        let instance = self.instance.clone();

        tokio::spawn(async move {
            forward_payloads(tx, subscription, &user).await;

            if let Err(e) = registry.unregister(&user).await {
                warn!(user = %user, error = %e, "Failed to unregister connection");
            }
            info!(user = %user, instance = %instance, "Client disconnected");
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Forward decoded payloads until the client disconnects, the
/// subscription ends, or the bus reports an error.
async fn forward_payloads(
    tx: mpsc::Sender<Result<WireMessage, Status>>,
    mut subscription: MessageStream,
    user: &str,
) {
    loop {
        tokio::select! {
            // Client disconnected - stop forwarding immediately
            _ = tx.closed() => {
                debug!(user = %user, "Client disconnected, closing subscription");
                break;
            }
            payload = subscription.next() => {
                match payload {
                    Some(Ok(bytes)) => {
                        let message = match WireMessage::decode(bytes.as_slice()) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(user = %user, error = %e, "Skipping undecodable payload");
                                continue;
                            }
                        };
                        debug!(
                            user = %user,
                            sender = %message.sender,
                            conversation_id = message.conversation_id,
                            "Forwarding message"
                        );
                        if tx.send(Ok(message)).await.is_err() {
                            debug!(user = %user, "Client disconnected during send");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(user = %user, error = %e, "Subscription error");
                        let status = Status::unavailable(format!("Message bus unavailable: {e}"));
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                    None => {
                        info!(user = %user, "Subscription ended");
                        break;
                    }
                }
            }
        }
    }
}
