//! Row types for the relational store.
//!
//! All timestamps are RFC 3339 strings maintained by the repositories: set
//! on insert, refreshed on update/upsert.

use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Reserved message lifecycle status; the routing core never moves it.
pub const MESSAGE_STATUS_CREATED: &str = "created";

/// Delivery awaiting dispatch.
pub const DELIVERY_STATUS_PENDING: &str = "pending";
/// Delivery published to every resolved destination.
pub const DELIVERY_STATUS_DONE: &str = "done";

/// Default membership role.
pub const ROLE_MEMBER: &str = "member";

/// A user known to the gateway tier. Identity is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub identity: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            identity: row.try_get("identity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload for a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub identity: String,
}

/// A conversation; an opaque identifier plus timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload for a conversation. An explicit id provisions that
/// identifier; `None` lets the store assign one.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub id: Option<i64>,
}

/// A user's participation in a conversation. At most one active role per
/// (user, conversation) pair; these rows are the sole source of truth for
/// who receives messages in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub id: i64,
    pub user_identity: String,
    pub conversation_id: i64,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Membership {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_identity: row.try_get("user_identity")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload for a membership.
#[derive(Debug, Clone)]
pub struct NewMembership {
    pub user_identity: String,
    pub conversation_id: i64,
    pub role: String,
}

impl NewMembership {
    pub fn member(user_identity: impl Into<String>, conversation_id: i64) -> Self {
        Self {
            user_identity: user_identity.into(),
            conversation_id,
            role: ROLE_MEMBER.to_string(),
        }
    }
}

/// A stored message. Immutable after creation except for the reserved
/// status column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub dedup_key: String,
    pub sender: String,
    pub conversation_id: i64,
    pub content: String,
    pub message_type: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Message {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            dedup_key: row.try_get("dedup_key")?,
            sender: row.try_get("sender")?,
            conversation_id: row.try_get("conversation_id")?,
            content: row.try_get("content")?,
            message_type: row.try_get("message_type")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload for a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub conversation_id: i64,
    pub content: String,
    pub message_type: String,
}

impl NewMessage {
    /// Content-derived idempotency key: a repeated send with the same
    /// identifying fields lands on the same row instead of duplicating.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.as_bytes());
        hasher.update([0]);
        hasher.update(self.conversation_id.to_be_bytes());
        hasher.update([0]);
        hasher.update(self.content.as_bytes());
        hasher.update([0]);
        hasher.update(self.message_type.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// An outbox row pairing a committed message with its recipient snapshot
/// and encoded payload until every destination publish has been attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub message_id: i64,
    pub recipients: Vec<String>,
    pub payload: Vec<u8>,
    pub status: String,
    pub attempts: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Delivery {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let raw: String = row.try_get("recipients")?;
        let recipients = serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
            index: "recipients".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            recipients,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload for a delivery.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub message_id: i64,
    pub recipients: Vec<String>,
    pub payload: Vec<u8>,
}

/// Current time in the store's timestamp format.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
