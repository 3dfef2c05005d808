//! Membership repository.
//!
//! Membership rows are the sole source of truth for who must receive
//! messages in a conversation; the fanout path reads them inside the same
//! unit of work that persists the message.

use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::models::{now, Membership, NewMembership};
use super::schema;
use super::Result;

/// Filter for membership queries. Empty means unconstrained.
#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    pub user_identity: Option<String>,
    pub conversation_id: Option<i64>,
}

impl MembershipFilter {
    pub fn by_conversation(conversation_id: i64) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            ..Self::default()
        }
    }

    pub fn by_user(user_identity: impl Into<String>) -> Self {
        Self {
            user_identity: Some(user_identity.into()),
            ..Self::default()
        }
    }
}

/// Membership operations bound to one transaction.
pub struct Memberships<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> Memberships<'a> {
    pub(crate) fn new(tx: &'a mut Transaction<'static, Sqlite>) -> Self {
        Self { conn: &mut **tx }
    }

    fn select(filter: &MembershipFilter) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk)
            .from(schema::Memberships::Table)
            .order_by(schema::Memberships::Id, Order::Asc);
        if let Some(user_identity) = &filter.user_identity {
            stmt.and_where(
                Expr::col(schema::Memberships::UserIdentity).eq(user_identity.as_str()),
            );
        }
        if let Some(conversation_id) = filter.conversation_id {
            stmt.and_where(Expr::col(schema::Memberships::ConversationId).eq(conversation_id));
        }
        stmt.to_string(SqliteQueryBuilder)
    }

    pub async fn get(&mut self, filter: &MembershipFilter) -> Result<Option<Membership>> {
        let sql = Self::select(filter);
        let row = sqlx::query(&sql).fetch_optional(&mut *self.conn).await?;
        row.as_ref()
            .map(Membership::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list(&mut self, filter: &MembershipFilter) -> Result<Vec<Membership>> {
        let sql = Self::select(filter);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|row| Membership::from_row(row).map_err(Into::into))
            .collect()
    }

    pub async fn insert(&mut self, membership: &NewMembership) -> Result<Membership> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Memberships::Table)
            .columns([
                schema::Memberships::UserIdentity,
                schema::Memberships::ConversationId,
                schema::Memberships::Role,
                schema::Memberships::CreatedAt,
                schema::Memberships::UpdatedAt,
            ])
            .values_panic([
                membership.user_identity.as_str().into(),
                membership.conversation_id.into(),
                membership.role.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(Membership {
            id: result.last_insert_rowid(),
            user_identity: membership.user_identity.clone(),
            conversation_id: membership.conversation_id,
            role: membership.role.clone(),
            created_at: created_at.clone(),
            updated_at: created_at,
        })
    }

    /// Insert unless the (user, conversation) pair already exists. Returns
    /// `None` when the row was skipped.
    pub async fn insert_ignore(&mut self, membership: &NewMembership) -> Result<Option<Membership>> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Memberships::Table)
            .columns([
                schema::Memberships::UserIdentity,
                schema::Memberships::ConversationId,
                schema::Memberships::Role,
                schema::Memberships::CreatedAt,
                schema::Memberships::UpdatedAt,
            ])
            .values_panic([
                membership.user_identity.as_str().into(),
                membership.conversation_id.into(),
                membership.role.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    schema::Memberships::UserIdentity,
                    schema::Memberships::ConversationId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(Membership {
            id: result.last_insert_rowid(),
            user_identity: membership.user_identity.clone(),
            conversation_id: membership.conversation_id,
            role: membership.role.clone(),
            created_at: created_at.clone(),
            updated_at: created_at,
        }))
    }

    /// Insert or, when the (user, conversation) pair exists, replace its
    /// role. At most one active role per pair.
    pub async fn upsert(&mut self, membership: &NewMembership) -> Result<Membership> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Memberships::Table)
            .columns([
                schema::Memberships::UserIdentity,
                schema::Memberships::ConversationId,
                schema::Memberships::Role,
                schema::Memberships::CreatedAt,
                schema::Memberships::UpdatedAt,
            ])
            .values_panic([
                membership.user_identity.as_str().into(),
                membership.conversation_id.into(),
                membership.role.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    schema::Memberships::UserIdentity,
                    schema::Memberships::ConversationId,
                ])
                .update_columns([schema::Memberships::Role, schema::Memberships::UpdatedAt])
                .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;

        let filter = MembershipFilter {
            user_identity: Some(membership.user_identity.clone()),
            conversation_id: Some(membership.conversation_id),
        };
        let sql = Self::select(&filter);
        let row = sqlx::query(&sql).fetch_one(&mut *self.conn).await?;
        Ok(Membership::from_row(&row)?)
    }

    pub async fn insert_many(&mut self, memberships: &[NewMembership]) -> Result<()> {
        self.insert_batch(memberships, None).await
    }

    pub async fn insert_many_ignore(&mut self, memberships: &[NewMembership]) -> Result<()> {
        let conflict = OnConflict::columns([
            schema::Memberships::UserIdentity,
            schema::Memberships::ConversationId,
        ])
        .do_nothing()
        .to_owned();
        self.insert_batch(memberships, Some(conflict)).await
    }

    pub async fn upsert_many(&mut self, memberships: &[NewMembership]) -> Result<()> {
        let conflict = OnConflict::columns([
            schema::Memberships::UserIdentity,
            schema::Memberships::ConversationId,
        ])
        .update_columns([schema::Memberships::Role, schema::Memberships::UpdatedAt])
        .to_owned();
        self.insert_batch(memberships, Some(conflict)).await
    }

    async fn insert_batch(
        &mut self,
        memberships: &[NewMembership],
        conflict: Option<OnConflict>,
    ) -> Result<()> {
        if memberships.is_empty() {
            return Ok(());
        }

        let created_at = now();
        let mut stmt = Query::insert();
        stmt.into_table(schema::Memberships::Table).columns([
            schema::Memberships::UserIdentity,
            schema::Memberships::ConversationId,
            schema::Memberships::Role,
            schema::Memberships::CreatedAt,
            schema::Memberships::UpdatedAt,
        ]);
        for membership in memberships {
            stmt.values_panic([
                membership.user_identity.as_str().into(),
                membership.conversation_id.into(),
                membership.role.as_str().into(),
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

    /// Rewrite the row's role by id.
    pub async fn update(&mut self, membership: &Membership) -> Result<()> {
        let sql = Query::update()
            .table(schema::Memberships::Table)
            .value(schema::Memberships::Role, membership.role.as_str())
            .value(schema::Memberships::UpdatedAt, now())
            .and_where(Expr::col(schema::Memberships::Id).eq(membership.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }
}
