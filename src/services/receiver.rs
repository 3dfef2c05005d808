//! Receiver service.
//!
//! Accepts message sends, persists them together with a recipient
//! snapshot in one transaction, then dispatches the payload toward the
//! instances currently serving those recipients.

use std::sync::Arc;

use prost::Message as _;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::proto::receiver_server::Receiver;
use crate::proto::{Message as WireMessage, SendMessageRequest, SendMessageResponse};
use crate::storage::{Delivery, MembershipFilter, NewDelivery, NewMessage, UnitOfWork};
use crate::validation::{
    validate_content, validate_conversation_id, validate_identity, validate_message_type,
};

/// Response code for an accepted send.
const CODE_OK: i32 = 200;

/// Receiver service.
///
/// The send itself is one unit of work: the message row, the membership
/// read that fixes the recipient set, and the queued delivery commit or
/// roll back together. Publishing happens only after commit, so a bus or
/// registry outage can fail the call while the message stays persisted
/// for the background drain to deliver.
pub struct ReceiverService {
    uow: UnitOfWork,
    dispatcher: Arc<Dispatcher>,
}

/// Outcome of the transactional half of a send.
struct QueuedSend {
    message_id: i64,
    delivery: Option<Delivery>,
}

impl ReceiverService {
    pub fn new(uow: UnitOfWork, dispatcher: Arc<Dispatcher>) -> Self {
        Self { uow, dispatcher }
    }
}

#[tonic::async_trait]
impl Receiver for ReceiverService {
    async fn send_message(
        &self,
        request: Request<SendMessageRequest>,
    ) -> Result<Response<SendMessageResponse>, Status> {
        let req = request.into_inner();

        validate_identity(&req.sender)?;
        validate_conversation_id(req.conversation_id)?;
        validate_content(&req.content)?;
        let message_type = validate_message_type(req.r#type)?;

        let conversation_id = req.conversation_id;
        let new_message = NewMessage {
            sender: req.sender.clone(),
            conversation_id,
            content: req.content.clone(),
            message_type: message_type_name(message_type).to_string(),
        };

        let wire = WireMessage {
            sender: req.sender,
            conversation_id,
            content: req.content,
            r#type: message_type as i32,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let payload = wire.encode_to_vec();

        let queued = self
            .uow
            .run(move |store| {
                Box::pin(async move {
                    let members = store
                        .memberships()
                        .list(&MembershipFilter::by_conversation(conversation_id))
                        .await?;
                    if members.is_empty() {
                        return Ok(None);
                    }

                    let message = store.messages().upsert(&new_message).await?;

                    let recipients: Vec<String> = members
                        .into_iter()
                        .map(|m| m.user_identity)
                        .filter(|identity| *identity != new_message.sender)
                        .collect();

                    let delivery = if recipients.is_empty() {
                        None
                    } else {
                        store
                            .deliveries()
                            .enqueue(&NewDelivery {
                                message_id: message.id,
                                recipients,
                                payload,
                            })
                            .await
                            .map(Some)?
                    };

                    Ok(Some(QueuedSend {
                        message_id: message.id,
                        delivery,
                    }))
                })
            })
            .await
            .map_err(|e| Status::internal(format!("Failed to queue message: {e}")))?;

        let Some(queued) = queued else {
            return Err(Status::not_found(format!(
                "Conversation {conversation_id} has no members"
            )));
        };

        if let Some(delivery) = &queued.delivery {
            if let Err(e) = self.dispatcher.dispatch(delivery).await {
                warn!(
                    message_id = queued.message_id,
                    delivery_id = delivery.id,
                    error = %e,
                    "Dispatch failed, delivery remains queued for retry"
                );
                return Err(dispatch_status(e));
            }
        }

        info!(
            message_id = queued.message_id,
            conversation_id, "Message accepted"
        );

        Ok(Response::new(SendMessageResponse {
            code: CODE_OK,
            message: "Success".to_string(),
        }))
    }
}

fn message_type_name(message_type: crate::proto::MessageType) -> &'static str {
    use crate::proto::MessageType;
    match message_type {
        MessageType::Unspecified => "UNSPECIFIED",
        MessageType::Text => "TEXT",
        MessageType::Media => "MEDIA",
    }
}

fn dispatch_status(err: DispatchError) -> Status {
    match err {
        DispatchError::Storage(e) => Status::internal(format!("Storage error: {e}")),
        DispatchError::Registry(e) => {
            Status::unavailable(format!("Connection registry unavailable: {e}"))
        }
        DispatchError::Bus(e) => Status::unavailable(format!("Message bus unavailable: {e}")),
    }
}
