//! Unit of work over the relational store.

use futures::future::BoxFuture;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::warn;

use super::conversations::Conversations;
use super::deliveries::Deliveries;
use super::memberships::Memberships;
use super::messages::Messages;
use super::users::Users;
use super::Result;

/// Entry point for transactional storage access.
#[derive(Clone)]
pub struct UnitOfWork {
    pool: SqlitePool,
}

impl UnitOfWork {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run `work` inside one transaction.
    ///
    /// Every repository operation performed through the store handle is
    /// part of the same all-or-nothing unit: if `work` returns an error the
    /// transaction is rolled back and the error is returned untouched; on
    /// success all writes commit atomically. Dropping the returned future
    /// before completion also rolls back.
    ///
    /// `run` must not be re-entered from inside `work`; callers needing
    /// several logical steps to be atomic compose them in a single closure.
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut Store) -> BoxFuture<'a, Result<T>> + Send,
    {
        let tx = self.pool.begin().await?;
        let mut store = Store { tx };
        match work(&mut store).await {
            Ok(value) => {
                store.tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = store.tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Store handle scoped to one transaction. Hands out per-entity
/// repositories borrowing the same underlying connection.
pub struct Store {
    tx: Transaction<'static, Sqlite>,
}

impl Store {
    pub fn users(&mut self) -> Users<'_> {
        Users::new(&mut self.tx)
    }

    pub fn conversations(&mut self) -> Conversations<'_> {
        Conversations::new(&mut self.tx)
    }

    pub fn memberships(&mut self) -> Memberships<'_> {
        Memberships::new(&mut self.tx)
    }

    pub fn messages(&mut self) -> Messages<'_> {
        Messages::new(&mut self.tx)
    }

    pub fn deliveries(&mut self) -> Deliveries<'_> {
        Deliveries::new(&mut self.tx)
    }
}
