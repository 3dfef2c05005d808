//! Bootstrap utilities for courier binaries.
//!
//! Shared initialization code for the receiver and streamer binaries.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the COURIER_LOG environment variable.
///
/// Defaults to "info" level if COURIER_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to a backing service with exponential backoff retry.
///
/// Retries `connect` up to 30 times, doubling the delay from 100ms to a
/// 5s cap, then gives up with the last error. Meant for startup, where a
/// dependency racing the process to readiness is routine.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const MAX_RETRIES: u32 = 30;
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(connected) => {
                info!(service = %service_name, address = %address, "Connected");
                return Ok(connected);
            }
            Err(e) if attempt < MAX_RETRIES => {
                warn!(
                    service = %service_name,
                    attempt,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    delay = ?delay,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                error!(
                    service = %service_name,
                    attempts = MAX_RETRIES,
                    error = %e,
                    "Connection failed, giving up"
                );
                return Err(e);
            }
        }
    }
}

/// Completes when the process receives a shutdown signal (Ctrl+C).
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
