//! Message fanout integration tests.
//!
//! Drives the full send path against in-memory infrastructure: SQLite
//! storage, the in-process registry, and the channel bus.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;
use sqlx::SqlitePool;
use tokio_stream::StreamExt;
use tonic::{Code, Request};

use courier::bus::{messages_topic, ChannelBus, MessageBus, MessageStream};
use courier::config::DispatchConfig;
use courier::dispatch::Dispatcher;
use courier::proto::receiver_server::Receiver;
use courier::proto::{Message as WireMessage, MessageType, SendMessageRequest};
use courier::registry::{self, ConnectionRegistry, MemoryRegistry, RegistryError};
use courier::services::ReceiverService;
use courier::storage::{
    init_schema, MessageFilter, NewConversation, NewMembership, NewUser, UnitOfWork,
    DELIVERY_STATUS_DONE, DELIVERY_STATUS_PENDING,
};

const CONVERSATION: i64 = 42;
const PRESENCE_TTL: Duration = Duration::from_secs(60);

struct Fixture {
    service: ReceiverService,
    uow: UnitOfWork,
    registry: Arc<MemoryRegistry>,
    bus: Arc<ChannelBus>,
}

async fn fixture() -> Fixture {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    init_schema(&pool).await.unwrap();
    let uow = UnitOfWork::new(pool);

    let registry = Arc::new(MemoryRegistry::new());
    let bus = Arc::new(ChannelBus::new());
    let dispatcher = Arc::new(Dispatcher::new(
        uow.clone(),
        registry.clone(),
        bus.clone(),
        DispatchConfig::default(),
    ));

    Fixture {
        service: ReceiverService::new(uow.clone(), dispatcher),
        uow,
        registry,
        bus,
    }
}

/// Registry standing in for an unreachable backend: every call fails.
struct DownRegistry;

fn outage() -> RegistryError {
    RegistryError::Unavailable(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait::async_trait]
impl ConnectionRegistry for DownRegistry {
    async fn register(&self, _user: &str, _instance: &str, _ttl: Duration) -> registry::Result<()> {
        Err(outage())
    }

    async fn unregister(&self, _user: &str) -> registry::Result<()> {
        Err(outage())
    }

    async fn lookup(&self, _users: &[String]) -> registry::Result<BTreeSet<String>> {
        Err(outage())
    }
}

async fn fixture_with_down_registry() -> (ReceiverService, UnitOfWork, Arc<ChannelBus>) {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    init_schema(&pool).await.unwrap();
    let uow = UnitOfWork::new(pool);

    let bus = Arc::new(ChannelBus::new());
    let dispatcher = Arc::new(Dispatcher::new(
        uow.clone(),
        Arc::new(DownRegistry),
        bus.clone(),
        DispatchConfig {
            grace_secs: 0,
            ..DispatchConfig::default()
        },
    ));
    (ReceiverService::new(uow.clone(), dispatcher), uow, bus)
}

/// Provision a conversation together with its member users.
async fn seed_conversation(uow: &UnitOfWork, members: &[&str]) {
    let users: Vec<NewUser> = members
        .iter()
        .map(|m| NewUser {
            identity: m.to_string(),
        })
        .collect();
    let memberships: Vec<NewMembership> = members
        .iter()
        .map(|m| NewMembership::member(*m, CONVERSATION))
        .collect();

    uow.run(move |store| {
        Box::pin(async move {
            store
                .conversations()
                .upsert(&NewConversation {
                    id: Some(CONVERSATION),
                })
                .await?;
            store.users().insert_many_ignore(&users).await?;
            store.memberships().upsert_many(&memberships).await?;
            Ok(())
        })
    })
    .await
    .unwrap();
}

fn send_request(sender: &str, content: &str) -> Request<SendMessageRequest> {
    Request::new(SendMessageRequest {
        sender: sender.to_string(),
        conversation_id: CONVERSATION,
        content: content.to_string(),
        r#type: MessageType::Text as i32,
    })
}

async fn next_payload(stream: &mut MessageStream) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for payload")
        .expect("stream ended")
        .expect("stream yielded error")
}

async fn assert_silent(stream: &mut MessageStream) {
    let next = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(next.is_err(), "expected no payload on the topic");
}

#[tokio::test]
async fn send_publishes_once_to_the_recipient_instance() {
    let f = fixture().await;
    seed_conversation(&f.uow, &["alice", "bob"]).await;
    f.registry
        .register("alice", "gw-1", PRESENCE_TTL)
        .await
        .unwrap();
    f.registry
        .register("bob", "gw-2", PRESENCE_TTL)
        .await
        .unwrap();

    let mut gw1 = f.bus.subscribe(&messages_topic("gw-1")).await.unwrap();
    let mut gw2 = f.bus.subscribe(&messages_topic("gw-2")).await.unwrap();

    let response = f
        .service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.code, 200);

    let decoded = WireMessage::decode(next_payload(&mut gw2).await.as_slice()).unwrap();
    assert_eq!(decoded.sender, "alice");
    assert_eq!(decoded.conversation_id, CONVERSATION);
    assert_eq!(decoded.content, "hi");
    assert_eq!(decoded.r#type, MessageType::Text as i32);
    assert!(decoded.timestamp > 0);

    assert_silent(&mut gw2).await;
    // The sender is not a recipient of their own message.
    assert_silent(&mut gw1).await;

    let delivery = f
        .uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DELIVERY_STATUS_DONE);
}

#[tokio::test]
async fn recipients_sharing_an_instance_get_one_publish() {
    let f = fixture().await;
    seed_conversation(&f.uow, &["alice", "bob", "carol"]).await;
    f.registry
        .register("bob", "gw-2", PRESENCE_TTL)
        .await
        .unwrap();
    f.registry
        .register("carol", "gw-2", PRESENCE_TTL)
        .await
        .unwrap();

    let mut gw2 = f.bus.subscribe(&messages_topic("gw-2")).await.unwrap();

    f.service
        .send_message(send_request("alice", "hi both"))
        .await
        .unwrap();

    next_payload(&mut gw2).await;
    assert_silent(&mut gw2).await;
}

#[tokio::test]
async fn each_resolved_instance_gets_the_payload() {
    let f = fixture().await;
    seed_conversation(&f.uow, &["alice", "bob", "carol", "dave"]).await;
    f.registry
        .register("bob", "gw-2", PRESENCE_TTL)
        .await
        .unwrap();
    f.registry
        .register("carol", "gw-3", PRESENCE_TTL)
        .await
        .unwrap();
    // dave has no open stream anywhere.

    let mut gw2 = f.bus.subscribe(&messages_topic("gw-2")).await.unwrap();
    let mut gw3 = f.bus.subscribe(&messages_topic("gw-3")).await.unwrap();

    let response = f
        .service
        .send_message(send_request("alice", "hi all"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.code, 200);

    next_payload(&mut gw2).await;
    next_payload(&mut gw3).await;
    assert_silent(&mut gw2).await;
    assert_silent(&mut gw3).await;
}

#[tokio::test]
async fn offline_recipients_do_not_block_the_send() {
    let f = fixture().await;
    seed_conversation(&f.uow, &["alice", "bob"]).await;

    let response = f
        .service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.code, 200);

    let delivery = f
        .uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DELIVERY_STATUS_DONE);
    assert_eq!(delivery.recipients, vec!["bob"]);
}

#[tokio::test]
async fn send_without_other_members_persists_without_delivery() {
    let f = fixture().await;
    seed_conversation(&f.uow, &["alice"]).await;

    let response = f
        .service
        .send_message(send_request("alice", "talking to myself"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.code, 200);

    let messages = f
        .uow
        .run(|store| {
            Box::pin(async move {
                store
                    .messages()
                    .list(&MessageFilter::by_conversation(CONVERSATION))
                    .await
            })
        })
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);

    let delivery = f
        .uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap();
    assert!(delivery.is_none());
}

#[tokio::test]
async fn unknown_conversation_is_rejected_and_writes_nothing() {
    let f = fixture().await;

    let err = f
        .service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let messages = f
        .uow
        .run(|store| {
            Box::pin(async move { store.messages().list(&MessageFilter::default()).await })
        })
        .await
        .unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn invalid_sender_is_rejected() {
    let f = fixture().await;

    let err = f
        .service
        .send_message(send_request("", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn registry_outage_fails_the_send_but_keeps_the_message() {
    let (service, uow, _bus) = fixture_with_down_registry().await;
    seed_conversation(&uow, &["alice", "bob"]).await;

    let err = service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);

    let messages = uow
        .run(|store| {
            Box::pin(async move {
                store
                    .messages()
                    .list(&MessageFilter::by_conversation(CONVERSATION))
                    .await
            })
        })
        .await
        .unwrap();
    assert_eq!(messages.len(), 1, "the message commits before dispatch");

    let delivery = uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DELIVERY_STATUS_PENDING);
    assert_eq!(delivery.attempts, 0);
}

#[tokio::test]
async fn drain_recovers_deliveries_after_an_outage() {
    let (service, uow, bus) = fixture_with_down_registry().await;
    seed_conversation(&uow, &["alice", "bob"]).await;

    service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap_err();

    // The registry comes back with bob connected to gw-2.
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register("bob", "gw-2", PRESENCE_TTL)
        .await
        .unwrap();
    let recovered = Dispatcher::new(
        uow.clone(),
        registry,
        bus.clone(),
        DispatchConfig {
            grace_secs: 0,
            ..DispatchConfig::default()
        },
    );

    let mut gw2 = bus.subscribe(&messages_topic("gw-2")).await.unwrap();
    let drained = recovered.drain_pending().await.unwrap();
    assert_eq!(drained, 1);

    let decoded = WireMessage::decode(next_payload(&mut gw2).await.as_slice()).unwrap();
    assert_eq!(decoded.content, "hi");

    let delivery = uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DELIVERY_STATUS_DONE);
}

#[tokio::test]
async fn failed_drain_attempts_are_counted() {
    let (service, uow, bus) = fixture_with_down_registry().await;
    seed_conversation(&uow, &["alice", "bob"]).await;

    service
        .send_message(send_request("alice", "hi"))
        .await
        .unwrap_err();

    let still_down = Dispatcher::new(
        uow.clone(),
        Arc::new(DownRegistry),
        bus,
        DispatchConfig {
            grace_secs: 0,
            ..DispatchConfig::default()
        },
    );
    let drained = still_down.drain_pending().await.unwrap();
    assert_eq!(drained, 0);

    let delivery = uow
        .run(|store| Box::pin(async move { store.deliveries().get(1).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DELIVERY_STATUS_PENDING);
    assert_eq!(delivery.attempts, 1);
}
