//! Delivery dispatch: resolving queued deliveries and publishing them.
//!
//! A delivery row is the durable record of a fanout still owed to the bus.
//! Dispatch resolves the row's recipients through the connection registry,
//! publishes the stored payload once per resolved instance topic, and only
//! then marks the row done. A failed dispatch leaves the row queued; the
//! background drain task retries it after a grace period, so a payload can
//! be published more than once but is never silently lost.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bus::{messages_topic, BusError, MessageBus};
use crate::config::DispatchConfig;
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::storage::{Delivery, StorageError, UnitOfWork};

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while dispatching deliveries.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Resolves and publishes queued deliveries.
pub struct Dispatcher {
    uow: UnitOfWork,
    registry: Arc<dyn ConnectionRegistry>,
    bus: Arc<dyn MessageBus>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        uow: UnitOfWork,
        registry: Arc<dyn ConnectionRegistry>,
        bus: Arc<dyn MessageBus>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            uow,
            registry,
            bus,
            config,
        }
    }

    /// Publish one queued delivery and mark it done.
    ///
    /// Recipients with no registry entry are skipped; recipients sharing an
    /// instance collapse to a single publish on that instance's topic. An
    /// error from the registry or the bus leaves the row queued.
    pub async fn dispatch(&self, delivery: &Delivery) -> Result<()> {
        let instances = self.registry.lookup(&delivery.recipients).await?;

        for instance in &instances {
            let topic = messages_topic(instance);
            self.bus.publish(&topic, &delivery.payload).await?;
        }

        let delivery_id = delivery.id;
        self.uow
            .run(|store| Box::pin(async move { store.deliveries().mark_done(delivery_id).await }))
            .await?;

        debug!(
            delivery_id,
            recipients = delivery.recipients.len(),
            instances = instances.len(),
            "Delivery dispatched"
        );
        Ok(())
    }

    /// One drain pass over deliveries still queued past the grace period.
    ///
    /// Each delivery is retried independently; a failure records the
    /// attempt and moves on, so one dead recipient cannot block the queue.
    /// Returns the number of deliveries dispatched.
    pub async fn drain_pending(&self) -> Result<u32> {
        let grace_secs = self.config.grace_secs;
        let max_attempts = self.config.max_attempts;
        let batch_size = self.config.batch_size;
        let pending = self
            .uow
            .run(|store| {
                Box::pin(async move {
                    store
                        .deliveries()
                        .list_pending(grace_secs, max_attempts, batch_size)
                        .await
                })
            })
            .await?;

        let mut dispatched = 0u32;
        for delivery in pending {
            match self.dispatch(&delivery).await {
                Ok(()) => {
                    dispatched += 1;
                }
                Err(e) => {
                    warn!(
                        delivery_id = delivery.id,
                        attempts = delivery.attempts + 1,
                        error = %e,
                        "Failed to dispatch queued delivery"
                    );
                    let row = delivery.clone();
                    let recorded = self
                        .uow
                        .run(move |store| {
                            Box::pin(
                                async move { store.deliveries().record_attempt(&row).await },
                            )
                        })
                        .await;
                    if let Err(e) = recorded {
                        error!(delivery_id = delivery.id, error = %e, "Failed to record dispatch attempt");
                    }
                }
            }
        }

        if dispatched > 0 {
            info!(dispatched, "Recovered queued deliveries");
        }
        Ok(dispatched)
    }
}

/// Handle to a running drain task.
pub struct DrainTaskHandle {
    cancel: tokio::sync::watch::Sender<bool>,
}

impl DrainTaskHandle {
    /// Signal the drain task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Spawn a background task that periodically drains queued deliveries.
///
/// Returns a handle that can be used to stop the task.
pub fn spawn_drain_task(dispatcher: Arc<Dispatcher>) -> DrainTaskHandle {
    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
    let interval = Duration::from_secs(dispatcher.config.interval_secs);

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Delivery drain task started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = dispatcher.drain_pending().await {
                        error!(error = %e, "Delivery drain failed");
                    }
                }
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!("Delivery drain task stopped");
                        break;
                    }
                }
            }
        }
    });

    DrainTaskHandle { cancel: cancel_tx }
}
