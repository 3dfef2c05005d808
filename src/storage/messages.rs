//! Message repository.
//!
//! Messages carry a content-derived dedup key as their conflict target: a
//! retried send with identical identifying fields overwrites its earlier
//! row instead of duplicating it.

use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::models::{now, Message, NewMessage, MESSAGE_STATUS_CREATED};
use super::schema;
use super::Result;

/// Filter for message queries. Empty means unconstrained.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender: Option<String>,
    pub conversation_id: Option<i64>,
    pub dedup_key: Option<String>,
}

impl MessageFilter {
    pub fn by_conversation(conversation_id: i64) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            ..Self::default()
        }
    }

    pub fn by_dedup_key(dedup_key: impl Into<String>) -> Self {
        Self {
            dedup_key: Some(dedup_key.into()),
            ..Self::default()
        }
    }
}

/// Message operations bound to one transaction.
pub struct Messages<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> Messages<'a> {
    pub(crate) fn new(tx: &'a mut Transaction<'static, Sqlite>) -> Self {
        Self { conn: &mut **tx }
    }

    fn select(filter: &MessageFilter) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk)
            .from(schema::Messages::Table)
            .order_by(schema::Messages::Id, Order::Asc);
        if let Some(sender) = &filter.sender {
            stmt.and_where(Expr::col(schema::Messages::Sender).eq(sender.as_str()));
        }
        if let Some(conversation_id) = filter.conversation_id {
            stmt.and_where(Expr::col(schema::Messages::ConversationId).eq(conversation_id));
        }
        if let Some(dedup_key) = &filter.dedup_key {
            stmt.and_where(Expr::col(schema::Messages::DedupKey).eq(dedup_key.as_str()));
        }
        stmt.to_string(SqliteQueryBuilder)
    }

    pub async fn get(&mut self, filter: &MessageFilter) -> Result<Option<Message>> {
        let sql = Self::select(filter);
        let row = sqlx::query(&sql).fetch_optional(&mut *self.conn).await?;
        row.as_ref()
            .map(Message::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list(&mut self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let sql = Self::select(filter);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|row| Message::from_row(row).map_err(Into::into))
            .collect()
    }

    pub async fn insert(&mut self, message: &NewMessage) -> Result<Message> {
        let created_at = now();
        let dedup_key = message.dedup_key();
        let sql = Self::insert_stmt(message, &dedup_key, &created_at)
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(Self::materialize(
            message,
            dedup_key,
            created_at,
            result.last_insert_rowid(),
        ))
    }

    /// Insert unless the dedup key already exists. Returns `None` when the
    /// row was skipped.
    pub async fn insert_ignore(&mut self, message: &NewMessage) -> Result<Option<Message>> {
        let created_at = now();
        let dedup_key = message.dedup_key();
        let sql = Self::insert_stmt(message, &dedup_key, &created_at)
            .on_conflict(
                OnConflict::column(schema::Messages::DedupKey)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(Self::materialize(
            message,
            dedup_key,
            created_at,
            result.last_insert_rowid(),
        )))
    }

    /// Insert or, when the dedup key exists, overwrite the earlier row's
    /// update timestamp. Returns the stored row either way.
    pub async fn upsert(&mut self, message: &NewMessage) -> Result<Message> {
        let created_at = now();
        let dedup_key = message.dedup_key();
        let sql = Self::insert_stmt(message, &dedup_key, &created_at)
            .on_conflict(
                OnConflict::column(schema::Messages::DedupKey)
                    .update_columns([schema::Messages::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;

        let sql = Self::select(&MessageFilter::by_dedup_key(dedup_key));
        let row = sqlx::query(&sql).fetch_one(&mut *self.conn).await?;
        Ok(Message::from_row(&row)?)
    }

    pub async fn insert_many(&mut self, messages: &[NewMessage]) -> Result<()> {
        self.insert_batch(messages, None).await
    }

    pub async fn insert_many_ignore(&mut self, messages: &[NewMessage]) -> Result<()> {
        let conflict = OnConflict::column(schema::Messages::DedupKey)
            .do_nothing()
            .to_owned();
        self.insert_batch(messages, Some(conflict)).await
    }

    pub async fn upsert_many(&mut self, messages: &[NewMessage]) -> Result<()> {
        let conflict = OnConflict::column(schema::Messages::DedupKey)
            .update_columns([schema::Messages::UpdatedAt])
            .to_owned();
        self.insert_batch(messages, Some(conflict)).await
    }

    async fn insert_batch(
        &mut self,
        messages: &[NewMessage],
        conflict: Option<OnConflict>,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let created_at = now();
        let mut stmt = Query::insert();
        stmt.into_table(schema::Messages::Table).columns([
            schema::Messages::DedupKey,
            schema::Messages::Sender,
            schema::Messages::ConversationId,
            schema::Messages::Content,
            schema::Messages::MessageType,
            schema::Messages::Status,
            schema::Messages::CreatedAt,
            schema::Messages::UpdatedAt,
        ]);
        for message in messages {
            stmt.values_panic([
                message.dedup_key().into(),
                message.sender.as_str().into(),
                message.conversation_id.into(),
                message.content.as_str().into(),
                message.message_type.as_str().into(),
                MESSAGE_STATUS_CREATED.into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ]);
        }
        if let Some(conflict) = conflict {
            stmt.on_conflict(conflict);
        }

        let sql = stmt.to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }

    /// Rewrite the row's lifecycle status by id. Content is immutable.
    pub async fn update(&mut self, message: &Message) -> Result<()> {
        let sql = Query::update()
            .table(schema::Messages::Table)
            .value(schema::Messages::Status, message.status.as_str())
            .value(schema::Messages::UpdatedAt, now())
            .and_where(Expr::col(schema::Messages::Id).eq(message.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }

    fn insert_stmt(
        message: &NewMessage,
        dedup_key: &str,
        created_at: &str,
    ) -> sea_query::InsertStatement {
        let mut stmt = Query::insert();
        stmt.into_table(schema::Messages::Table)
            .columns([
                schema::Messages::DedupKey,
                schema::Messages::Sender,
                schema::Messages::ConversationId,
                schema::Messages::Content,
                schema::Messages::MessageType,
                schema::Messages::Status,
                schema::Messages::CreatedAt,
                schema::Messages::UpdatedAt,
            ])
            .values_panic([
                dedup_key.into(),
                message.sender.as_str().into(),
                message.conversation_id.into(),
                message.content.as_str().into(),
                message.message_type.as_str().into(),
                MESSAGE_STATUS_CREATED.into(),
                created_at.into(),
                created_at.into(),
            ]);
        stmt
    }

    fn materialize(
        message: &NewMessage,
        dedup_key: String,
        created_at: String,
        id: i64,
    ) -> Message {
        Message {
            id,
            dedup_key,
            sender: message.sender.clone(),
            conversation_id: message.conversation_id,
            content: message.content.clone(),
            message_type: message.message_type.clone(),
            status: MESSAGE_STATUS_CREATED.to_string(),
            created_at: created_at.clone(),
            updated_at: created_at,
        }
    }
}
