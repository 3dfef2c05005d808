//! User repository.

use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::models::{now, NewUser, User};
use super::schema;
use super::Result;

/// Filter for user queries. Empty means unconstrained.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub identity: Option<String>,
}

impl UserFilter {
    pub fn by_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
        }
    }
}

/// User operations bound to one transaction.
pub struct Users<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> Users<'a> {
    pub(crate) fn new(tx: &'a mut Transaction<'static, Sqlite>) -> Self {
        Self { conn: &mut **tx }
    }

    fn select(filter: &UserFilter) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk)
            .from(schema::Users::Table)
            .order_by(schema::Users::Id, Order::Asc);
        if let Some(identity) = &filter.identity {
            stmt.and_where(Expr::col(schema::Users::Identity).eq(identity.as_str()));
        }
        stmt.to_string(SqliteQueryBuilder)
    }

    /// First matching user, by ascending id.
    pub async fn get(&mut self, filter: &UserFilter) -> Result<Option<User>> {
        let sql = Self::select(filter);
        let row = sqlx::query(&sql).fetch_optional(&mut *self.conn).await?;
        row.as_ref().map(User::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(&mut self, filter: &UserFilter) -> Result<Vec<User>> {
        let sql = Self::select(filter);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|row| User::from_row(row).map_err(Into::into))
            .collect()
    }

    pub async fn insert(&mut self, user: &NewUser) -> Result<User> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Users::Table)
            .columns([
                schema::Users::Identity,
                schema::Users::CreatedAt,
                schema::Users::UpdatedAt,
            ])
            .values_panic([
                user.identity.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(User {
            id: result.last_insert_rowid(),
            identity: user.identity.clone(),
            created_at: created_at.clone(),
            updated_at: created_at,
        })
    }

    /// Insert unless the identity already exists. Returns `None` when the
    /// row was skipped.
    pub async fn insert_ignore(&mut self, user: &NewUser) -> Result<Option<User>> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Users::Table)
            .columns([
                schema::Users::Identity,
                schema::Users::CreatedAt,
                schema::Users::UpdatedAt,
            ])
            .values_panic([
                user.identity.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::column(schema::Users::Identity)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(User {
            id: result.last_insert_rowid(),
            identity: user.identity.clone(),
            created_at: created_at.clone(),
            updated_at: created_at,
        }))
    }

    /// Insert or, when the identity exists, refresh its update timestamp.
    pub async fn upsert(&mut self, user: &NewUser) -> Result<User> {
        let created_at = now();
        let sql = Query::insert()
            .into_table(schema::Users::Table)
            .columns([
                schema::Users::Identity,
                schema::Users::CreatedAt,
                schema::Users::UpdatedAt,
            ])
            .values_panic([
                user.identity.as_str().into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .on_conflict(
                OnConflict::column(schema::Users::Identity)
                    .update_columns([schema::Users::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;

        let sql = Self::select(&UserFilter::by_identity(user.identity.clone()));
        let row = sqlx::query(&sql).fetch_one(&mut *self.conn).await?;
        Ok(User::from_row(&row)?)
    }

    pub async fn insert_many(&mut self, users: &[NewUser]) -> Result<()> {
        self.insert_batch(users, None).await
    }

    pub async fn insert_many_ignore(&mut self, users: &[NewUser]) -> Result<()> {
        let conflict = OnConflict::column(schema::Users::Identity)
            .do_nothing()
            .to_owned();
        self.insert_batch(users, Some(conflict)).await
    }

    pub async fn upsert_many(&mut self, users: &[NewUser]) -> Result<()> {
        let conflict = OnConflict::column(schema::Users::Identity)
            .update_columns([schema::Users::UpdatedAt])
            .to_owned();
        self.insert_batch(users, Some(conflict)).await
    }

    async fn insert_batch(&mut self, users: &[NewUser], conflict: Option<OnConflict>) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }

        let created_at = now();
        let mut stmt = Query::insert();
        stmt.into_table(schema::Users::Table).columns([
            schema::Users::Identity,
            schema::Users::CreatedAt,
            schema::Users::UpdatedAt,
        ]);
        for user in users {
            stmt.values_panic([
                user.identity.as_str().into(),
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

    /// Refresh the row's update timestamp by id. Identity is immutable.
    pub async fn update(&mut self, user: &User) -> Result<()> {
        let sql = Query::update()
            .table(schema::Users::Table)
            .value(schema::Users::UpdatedAt, now())
            .and_where(Expr::col(schema::Users::Id).eq(user.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }
}
