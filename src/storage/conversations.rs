//! Conversation repository.

use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::models::{now, Conversation, NewConversation};
use super::schema;
use super::Result;

/// Filter for conversation queries. Empty means unconstrained.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub id: Option<i64>,
}

impl ConversationFilter {
    pub fn by_id(id: i64) -> Self {
        Self { id: Some(id) }
    }
}

/// Conversation operations bound to one transaction.
pub struct Conversations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> Conversations<'a> {
    pub(crate) fn new(tx: &'a mut Transaction<'static, Sqlite>) -> Self {
        Self { conn: &mut **tx }
    }

    fn select(filter: &ConversationFilter) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk)
            .from(schema::Conversations::Table)
            .order_by(schema::Conversations::Id, Order::Asc);
        if let Some(id) = filter.id {
            stmt.and_where(Expr::col(schema::Conversations::Id).eq(id));
        }
        stmt.to_string(SqliteQueryBuilder)
    }

    pub async fn get(&mut self, filter: &ConversationFilter) -> Result<Option<Conversation>> {
        let sql = Self::select(filter);
        let row = sqlx::query(&sql).fetch_optional(&mut *self.conn).await?;
        row.as_ref()
            .map(Conversation::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list(&mut self, filter: &ConversationFilter) -> Result<Vec<Conversation>> {
        let sql = Self::select(filter);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|row| Conversation::from_row(row).map_err(Into::into))
            .collect()
    }

    pub async fn insert(&mut self, conversation: &NewConversation) -> Result<Conversation> {
        let created_at = now();
        let sql = match conversation.id {
            Some(id) => Query::insert()
                .into_table(schema::Conversations::Table)
                .columns([
                    schema::Conversations::Id,
                    schema::Conversations::CreatedAt,
                    schema::Conversations::UpdatedAt,
                ])
                .values_panic([
                    id.into(),
                    created_at.as_str().into(),
                    created_at.as_str().into(),
                ])
                .to_string(SqliteQueryBuilder),
            None => Query::insert()
                .into_table(schema::Conversations::Table)
                .columns([
                    schema::Conversations::CreatedAt,
                    schema::Conversations::UpdatedAt,
                ])
                .values_panic([created_at.as_str().into(), created_at.as_str().into()])
                .to_string(SqliteQueryBuilder),
        };

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(Conversation {
            id: conversation.id.unwrap_or_else(|| result.last_insert_rowid()),
            created_at: created_at.clone(),
            updated_at: created_at,
        })
    }

    /// Insert unless the identifier already exists. Returns `None` when the
    /// row was skipped. Meaningful only for explicit identifiers.
    pub async fn insert_ignore(
        &mut self,
        conversation: &NewConversation,
    ) -> Result<Option<Conversation>> {
        let Some(id) = conversation.id else {
            return self.insert(conversation).await.map(Some);
        };

        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Conversations::Table)
            .columns([
                schema::Conversations::Id,
                schema::Conversations::CreatedAt,
                schema::Conversations::UpdatedAt,
            ])
            .values_panic([
                id.into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::column(schema::Conversations::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(Conversation {
            id,
            created_at: created_at.clone(),
            updated_at: created_at,
        }))
    }

    /// Insert or, when the identifier exists, refresh its update timestamp.
    pub async fn upsert(&mut self, conversation: &NewConversation) -> Result<Conversation> {
        let Some(id) = conversation.id else {
            return self.insert(conversation).await;
        };

        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Conversations::Table)
            .columns([
                schema::Conversations::Id,
                schema::Conversations::CreatedAt,
                schema::Conversations::UpdatedAt,
            ])
            .values_panic([
                id.into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::column(schema::Conversations::Id)
                    .update_columns([schema::Conversations::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;

        let sql = Self::select(&ConversationFilter::by_id(id));
        let row = sqlx::query(&sql).fetch_one(&mut *self.conn).await?;
        Ok(Conversation::from_row(&row)?)
    }

    /// Insert each payload in turn; identifiers may be mixed explicit/auto.
    pub async fn insert_many(
        &mut self,
        conversations: &[NewConversation],
    ) -> Result<Vec<Conversation>> {
        let mut inserted = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            inserted.push(self.insert(conversation).await?);
        }
        Ok(inserted)
    }

    pub async fn insert_many_ignore(&mut self, conversations: &[NewConversation]) -> Result<()> {
        for conversation in conversations {
            self.insert_ignore(conversation).await?;
        }
        Ok(())
    }

    pub async fn upsert_many(&mut self, conversations: &[NewConversation]) -> Result<()> {
        for conversation in conversations {
            self.upsert(conversation).await?;
        }
        Ok(())
    }

    /// Refresh the row's update timestamp by id.
    pub async fn update(&mut self, conversation: &Conversation) -> Result<()> {
        let sql = Query::update()
            .table(schema::Conversations::Table)
            .value(schema::Conversations::UpdatedAt, now())
            .and_where(Expr::col(schema::Conversations::Id).eq(conversation.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }
}
