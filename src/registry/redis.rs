//! Redis-backed connection registry.
//!
//! One key per user, `<prefix>:user:<identity>`, holding the instance id
//! as a plain string with a TTL. Registration is a single overwriting
//! `SET .. EX`, so concurrent registrations resolve last-write-wins and
//! expiry is enforced server-side.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use super::{ConnectionRegistry, Result};

/// Connection registry backed by Redis string keys.
pub struct RedisRegistry {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisRegistry {
    /// Connect to Redis at `url`. Keys are namespaced under `key_prefix`.
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        info!(url = %url, "Connecting to Redis connection registry");
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn presence_key(&self, user: &str) -> String {
        format!("{}:user:{}", self.key_prefix, user)
    }
}

#[async_trait]
impl ConnectionRegistry for RedisRegistry {
    async fn register(&self, user: &str, instance: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.presence_key(user);
        let _: () = conn.set_ex(&key, instance, ttl.as_secs()).await?;
        debug!(user = %user, instance = %instance, ttl_secs = ttl.as_secs(), "Registered connection");
        Ok(())
    }

    async fn unregister(&self, user: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.presence_key(user);
        let _: () = conn.del(&key).await?;
        debug!(user = %user, "Unregistered connection");
        Ok(())
    }

    async fn lookup(&self, users: &[String]) -> Result<BTreeSet<String>> {
        // MGET with no keys is a protocol error, and there is nothing to ask.
        if users.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = users.iter().map(|u| self.presence_key(u)).collect();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;
        let instances: BTreeSet<String> = values.into_iter().flatten().collect();
        debug!(
            requested = users.len(),
            resolved = instances.len(),
            "Resolved connection registry entries"
        );
        Ok(instances)
    }
}
