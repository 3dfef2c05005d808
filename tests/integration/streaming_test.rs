//! Streaming delivery integration tests.
//!
//! Exercises the streamer service end to end over the in-process registry
//! and channel bus: presence registration, payload forwarding, and
//! teardown when the client goes away.

use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;
use tokio_stream::StreamExt;
use tonic::{Code, Request};

use courier::bus::{messages_topic, ChannelBus, MessageBus};
use courier::proto::streamer_server::Streamer;
use courier::proto::{Message as WireMessage, MessageType, ReceiveMessagesRequest};
use courier::registry::{ConnectionRegistry, MemoryRegistry};
use courier::services::StreamerService;

const INSTANCE: &str = "gw-test";
const PRESENCE_TTL: Duration = Duration::from_secs(60);

type ReceiveStream = <StreamerService as Streamer>::ReceiveMessagesStream;

struct Fixture {
    service: StreamerService,
    registry: Arc<MemoryRegistry>,
    bus: Arc<ChannelBus>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(MemoryRegistry::new());
    let bus = Arc::new(ChannelBus::new());
    let service = StreamerService::new(registry.clone(), bus.clone(), INSTANCE, PRESENCE_TTL);
    Fixture {
        service,
        registry,
        bus,
    }
}

fn wire(content: &str) -> WireMessage {
    WireMessage {
        sender: "alice".to_string(),
        conversation_id: 42,
        content: content.to_string(),
        r#type: MessageType::Text as i32,
        timestamp: 1,
    }
}

async fn open_stream(f: &Fixture, user: &str) -> ReceiveStream {
    f.service
        .receive_messages(Request::new(ReceiveMessagesRequest {
            user: user.to_string(),
        }))
        .await
        .unwrap()
        .into_inner()
}

async fn publish(f: &Fixture, content: &str) {
    f.bus
        .publish(&messages_topic(INSTANCE), &wire(content).encode_to_vec())
        .await
        .unwrap();
}

async fn next_message(stream: &mut ReceiveStream) -> WireMessage {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("stream yielded error")
}

async fn assert_silent(stream: &mut ReceiveStream) {
    let next = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(next.is_err(), "expected no message on the stream");
}

#[tokio::test]
async fn stream_receives_published_messages_in_order() {
    let f = fixture();
    let mut stream = open_stream(&f, "bob").await;

    publish(&f, "first").await;
    publish(&f, "second").await;

    let first = next_message(&mut stream).await;
    assert_eq!(first.sender, "alice");
    assert_eq!(first.conversation_id, 42);
    assert_eq!(first.content, "first");
    assert_eq!(first.r#type, MessageType::Text as i32);

    let second = next_message(&mut stream).await;
    assert_eq!(second.content, "second");
}

#[tokio::test]
async fn every_open_stream_on_the_instance_sees_the_payload() {
    let f = fixture();
    let mut bob = open_stream(&f, "bob").await;
    let mut carol = open_stream(&f, "carol").await;

    publish(&f, "hello").await;

    assert_eq!(next_message(&mut bob).await.content, "hello");
    assert_eq!(next_message(&mut carol).await.content, "hello");
}

#[tokio::test]
async fn presence_lasts_exactly_as_long_as_the_stream() {
    let f = fixture();
    let stream = open_stream(&f, "bob").await;

    let resolved = f.registry.lookup(&["bob".to_string()]).await.unwrap();
    assert!(resolved.contains(INSTANCE));

    drop(stream);

    let mut cleared = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if f.registry
            .lookup(&["bob".to_string()])
            .await
            .unwrap()
            .is_empty()
        {
            cleared = true;
            break;
        }
    }
    assert!(cleared, "presence must clear after the stream is dropped");
}

#[tokio::test]
async fn undecodable_payloads_are_skipped() {
    let f = fixture();
    let mut stream = open_stream(&f, "bob").await;

    // Truncated varint: cannot decode as a message.
    f.bus
        .publish(&messages_topic(INSTANCE), &[0xff])
        .await
        .unwrap();
    publish(&f, "after the noise").await;

    assert_eq!(next_message(&mut stream).await.content, "after the noise");
}

#[tokio::test]
async fn payloads_for_other_instances_are_not_forwarded() {
    let f = fixture();
    let mut stream = open_stream(&f, "bob").await;

    f.bus
        .publish(&messages_topic("gw-other"), &wire("elsewhere").encode_to_vec())
        .await
        .unwrap();
    assert_silent(&mut stream).await;

    publish(&f, "here").await;
    assert_eq!(next_message(&mut stream).await.content, "here");
}

#[tokio::test]
async fn invalid_user_identity_is_rejected() {
    let f = fixture();

    let err = f
        .service
        .receive_messages(Request::new(ReceiveMessagesRequest {
            user: String::new(),
        }))
        .await
        .map(|_| ())
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}
