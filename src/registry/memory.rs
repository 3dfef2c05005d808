//! In-memory connection registry for standalone deployments and tests.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ConnectionRegistry, Result};

/// Process-local registry. Entries carry an expiry deadline that is
/// honored on lookup, mirroring the TTL semantics of the Redis backend.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn register(&self, user: &str, instance: &str, ttl: Duration) -> Result<()> {
        let deadline = Instant::now() + ttl;
        let mut entries = self.entries.lock().await;
        entries.insert(user.to_string(), (instance.to_string(), deadline));
        Ok(())
    }

    async fn unregister(&self, user: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(user);
        Ok(())
    }

    async fn lookup(&self, users: &[String]) -> Result<BTreeSet<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut instances = BTreeSet::new();
        for user in users {
            match entries.get(user) {
                Some((instance, deadline)) if *deadline > now => {
                    instances.insert(instance.clone());
                }
                Some(_) => {
                    // Expired; drop it so the map does not grow unbounded.
                    entries.remove(user);
                }
                None => {}
            }
        }
        Ok(instances)
    }
}
