//! courier-receiver: message intake service
//!
//! Accepts SendMessage calls, persists each message with a snapshot of its
//! recipients, and publishes the payload toward the instances currently
//! serving those recipients.
//!
//! ## Architecture
//! ```text
//! [Client] -> [courier-receiver] -> [SQLite: message + delivery]
//!                    |
//!                    v  (registry lookup)
//!              [messages.<instance>] -> [courier-streamer] -> [Client]
//! ```
//!
//! ## Configuration
//! - COURIER_CONFIG: path to a YAML config file (optional)
//! - COURIER__* environment overrides (e.g. COURIER__SERVER__PORT)
//! - COURIER_LOG: log filter (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::{error, info};

use courier::bus::init_message_bus;
use courier::config::Config;
use courier::dispatch::{spawn_drain_task, Dispatcher};
use courier::proto::receiver_server::ReceiverServer;
use courier::registry::init_registry;
use courier::services::ReceiverService;
use courier::storage::{init_storage, UnitOfWork};
use courier::transport::grpc_trace_layer;
use courier::utils::bootstrap::{connect_with_retry, init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting courier-receiver service");

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let pool = init_storage(&config.storage).await?;
    let uow = UnitOfWork::new(pool);

    let registry = connect_with_retry("connection registry", &config.redis.url, || {
        init_registry(&config.registry, &config.redis)
    })
    .await?;

    let bus = connect_with_retry("message bus", &config.redis.url, || {
        init_message_bus(&config.bus, &config.redis)
    })
    .await?;

    let dispatcher = Arc::new(Dispatcher::new(
        uow.clone(),
        registry,
        bus,
        config.dispatch.clone(),
    ));
    let drain_handle = spawn_drain_task(Arc::clone(&dispatcher));

    let receiver_service = ReceiverService::new(uow, dispatcher);

    let addr: SocketAddr = config.server.address().parse()?;

    // Create health reporter
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    info!(address = %addr, "Receiver gRPC server listening");

    Server::builder()
        .layer(grpc_trace_layer())
        .add_service(health_service)
        .add_service(ReceiverServer::new(receiver_service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    drain_handle.stop();

    Ok(())
}
