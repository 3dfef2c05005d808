//! courier-streamer: message delivery service
//!
//! Holds client streams open, marks each connected user as present on this
//! instance, and forwards every payload published to the instance topic.
//!
//! ## Architecture
//! ```text
//! [courier-receiver] -> [messages.<instance>] -> [courier-streamer] -> [Client]
//!                              ^
//!                              | one subscription per open client stream
//! ```
//!
//! ## Configuration
//! - COURIER_CONFIG: path to a YAML config file (optional)
//! - COURIER__* environment overrides (e.g. COURIER__INSTANCE__ID)
//! - COURIER_LOG: log filter (default: info)

use std::net::SocketAddr;
use std::time::Duration;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::{error, info};

use courier::bus::init_message_bus;
use courier::config::Config;
use courier::proto::streamer_server::StreamerServer;
use courier::registry::init_registry;
use courier::services::StreamerService;
use courier::transport::grpc_trace_layer;
use courier::utils::bootstrap::{connect_with_retry, init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting courier-streamer service");

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let registry = connect_with_retry("connection registry", &config.redis.url, || {
        init_registry(&config.registry, &config.redis)
    })
    .await?;

    let bus = connect_with_retry("message bus", &config.redis.url, || {
        init_message_bus(&config.bus, &config.redis)
    })
    .await?;

    let streamer_service = StreamerService::new(
        registry,
        bus,
        config.instance.id.clone(),
        Duration::from_secs(config.registry.ttl_secs),
    );

    let addr: SocketAddr = config.server.address().parse()?;

    // Create health reporter
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    info!(address = %addr, instance = %config.instance.id, "Streamer gRPC server listening");

    Server::builder()
        .layer(grpc_trace_layer())
        .add_service(health_service)
        .add_service(StreamerServer::new(streamer_service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    Ok(())
}
