//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Users table schema.
#[derive(Iden)]
pub enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "identity"]
    Identity,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Conversations table schema.
#[derive(Iden)]
pub enum Conversations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Memberships table schema.
#[derive(Iden)]
pub enum Memberships {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_identity"]
    UserIdentity,
    #[iden = "conversation_id"]
    ConversationId,
    #[iden = "role"]
    Role,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Messages table schema.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "dedup_key"]
    DedupKey,
    #[iden = "sender"]
    Sender,
    #[iden = "conversation_id"]
    ConversationId,
    #[iden = "content"]
    Content,
    #[iden = "message_type"]
    MessageType,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Deliveries (outbox) table schema.
#[derive(Iden)]
pub enum Deliveries {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "message_id"]
    MessageId,
    #[iden = "recipients"]
    Recipients,
    #[iden = "payload"]
    Payload,
    #[iden = "status"]
    Status,
    #[iden = "attempts"]
    Attempts,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the users table.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the conversations table.
pub const CREATE_CONVERSATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the memberships table.
///
/// Membership rows are the sole source of truth for who receives messages
/// in a conversation. The unique pair index enforces at most one active
/// role per (user, conversation).
pub const CREATE_MEMBERSHIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS memberships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identity TEXT NOT NULL REFERENCES users(identity),
    conversation_id INTEGER NOT NULL,
    role TEXT NOT NULL DEFAULT 'member',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_identity, conversation_id)
);

CREATE INDEX IF NOT EXISTS idx_memberships_conversation ON memberships(conversation_id);
"#;

/// SQL for creating the messages table.
pub const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dedup_key TEXT NOT NULL UNIQUE,
    sender TEXT NOT NULL,
    conversation_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    message_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'created',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
"#;

/// SQL for creating the deliveries table.
pub const CREATE_DELIVERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS deliveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    recipients TEXT NOT NULL,
    payload BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_status ON deliveries(status, updated_at);
"#;
