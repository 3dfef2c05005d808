//! Relational storage: schema, row types, and the unit of work.

use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;

pub mod conversations;
pub mod deliveries;
pub mod memberships;
pub mod messages;
pub mod models;
pub mod schema;
pub mod uow;
pub mod users;

pub use conversations::{ConversationFilter, Conversations};
pub use deliveries::Deliveries;
pub use memberships::{MembershipFilter, Memberships};
pub use messages::{MessageFilter, Messages};
pub use models::{
    Conversation, Delivery, Membership, Message, NewConversation, NewDelivery, NewMembership,
    NewMessage, NewUser, User, DELIVERY_STATUS_DONE, DELIVERY_STATUS_PENDING,
    MESSAGE_STATUS_CREATED, ROLE_MEMBER,
};
pub use uow::{Store, UnitOfWork};
pub use users::{UserFilter, Users};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Connect the SQLite pool and apply the schema.
pub async fn init_storage(config: &StorageConfig) -> Result<SqlitePool> {
    if let Some(parent) = std::path::Path::new(&config.path).parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(sqlx::Error::Io(e)))?;
    }

    let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
    init_schema(&pool).await?;

    info!(path = %config.path, "Storage initialized");
    Ok(pool)
}

/// Apply the schema to an already-connected pool. Used directly by tests
/// running on in-memory databases.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    // raw_sql, not query: the DDL blocks carry their index statements.
    for ddl in [
        schema::CREATE_USERS_TABLE,
        schema::CREATE_CONVERSATIONS_TABLE,
        schema::CREATE_MEMBERSHIPS_TABLE,
        schema::CREATE_MESSAGES_TABLE,
        schema::CREATE_DELIVERIES_TABLE,
    ] {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}
