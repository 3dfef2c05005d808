//! Connection registry: the presence map from user identity to the
//! instance currently serving it.
//!
//! Entries are advisory. Absence means unknown/offline, and a stale entry
//! may point at an instance the user has since left; the TTL is the sole
//! staleness bound.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{RedisConfig, RegistryConfig, RegistryKind};

pub mod memory;
pub mod redis;

pub use memory::MemoryRegistry;
pub use redis::RedisRegistry;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur against the registry backend.
///
/// A missing entry is not an error; it is simply an offline user. Errors
/// here mean the registry itself could not be reached, which callers must
/// treat as a hard failure rather than an empty result.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(#[from] ::redis::RedisError),
}

/// Presence map operations.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Upsert the presence entry for `user`, overwriting any previous
    /// instance mapping, with an expiry `ttl` from now. Concurrent
    /// registrations for the same user resolve last-write-wins.
    async fn register(&self, user: &str, instance: &str, ttl: Duration) -> Result<()>;

    /// Remove the mapping immediately. Idempotent; unregistering an absent
    /// user is not an error.
    async fn unregister(&self, user: &str) -> Result<()>;

    /// Resolve each requested user to its current instance, silently
    /// skipping users with no unexpired mapping. The result is
    /// de-duplicated and ordered: fanout addresses instances, not users.
    async fn lookup(&self, users: &[String]) -> Result<BTreeSet<String>>;
}

/// Initialize the registry selected by configuration.
pub async fn init_registry(
    config: &RegistryConfig,
    redis: &RedisConfig,
) -> Result<Arc<dyn ConnectionRegistry>> {
    match config.kind {
        RegistryKind::Redis => {
            let registry = RedisRegistry::new(&redis.url, &config.key_prefix).await?;
            info!(registry = "redis", "Connection registry initialized");
            Ok(Arc::new(registry))
        }
        RegistryKind::Memory => {
            info!(registry = "memory", "Connection registry initialized");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}
