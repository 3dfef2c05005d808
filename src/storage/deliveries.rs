//! Delivery (outbox) repository.
//!
//! A delivery row is written in the same transaction as its message and
//! stays pending until every resolved destination has been published to.
//! The background drain re-dispatches rows left pending by earlier
//! failures.

use sea_query::{Asterisk, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::models::{now, Delivery, NewDelivery, DELIVERY_STATUS_DONE, DELIVERY_STATUS_PENDING};
use super::schema;
use super::Result;

/// Delivery operations bound to one transaction.
pub struct Deliveries<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> Deliveries<'a> {
    pub(crate) fn new(tx: &'a mut Transaction<'static, Sqlite>) -> Self {
        Self { conn: &mut **tx }
    }

    /// Insert a pending delivery carrying the recipient snapshot and the
    /// encoded payload.
    pub async fn enqueue(&mut self, delivery: &NewDelivery) -> Result<Delivery> {
        let created_at = now();
        let recipients = serde_json::to_string(&delivery.recipients)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let sql = Query::insert()
            .into_table(schema::Deliveries::Table)
            .columns([
                schema::Deliveries::MessageId,
                schema::Deliveries::Recipients,
                schema::Deliveries::Payload,
                schema::Deliveries::Status,
                schema::Deliveries::Attempts,
                schema::Deliveries::CreatedAt,
                schema::Deliveries::UpdatedAt,
            ])
            .values_panic([
                delivery.message_id.into(),
                recipients.as_str().into(),
                delivery.payload.clone().into(),
                DELIVERY_STATUS_PENDING.into(),
                0i64.into(),
                created_at.as_str().into(),
                created_at.as_str().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(Delivery {
            id: result.last_insert_rowid(),
            message_id: delivery.message_id,
            recipients: delivery.recipients.clone(),
            payload: delivery.payload.clone(),
            status: DELIVERY_STATUS_PENDING.to_string(),
            attempts: 0,
            created_at: created_at.clone(),
            updated_at: created_at,
        })
    }

    pub async fn get(&mut self, id: i64) -> Result<Option<Delivery>> {
        let sql = Query::select()
            .column(Asterisk)
            .from(schema::Deliveries::Table)
            .and_where(Expr::col(schema::Deliveries::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&sql).fetch_optional(&mut *self.conn).await?;
        row.as_ref()
            .map(Delivery::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Pending deliveries untouched for at least `grace_secs`, oldest
    /// first, capped at `limit`. Rows at the attempt cap are excluded and
    /// left for operator inspection.
    pub async fn list_pending(
        &mut self,
        grace_secs: i64,
        max_attempts: i64,
        limit: u64,
    ) -> Result<Vec<Delivery>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(grace_secs)).to_rfc3339();

        let sql = Query::select()
            .column(Asterisk)
            .from(schema::Deliveries::Table)
            .and_where(Expr::col(schema::Deliveries::Status).eq(DELIVERY_STATUS_PENDING))
            .and_where(Expr::col(schema::Deliveries::UpdatedAt).lt(cutoff))
            .and_where(Expr::col(schema::Deliveries::Attempts).lt(max_attempts))
            .order_by(schema::Deliveries::CreatedAt, Order::Asc)
            .limit(limit)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|row| Delivery::from_row(row).map_err(Into::into))
            .collect()
    }

    /// Flip the row to done after every destination publish succeeded.
    pub async fn mark_done(&mut self, id: i64) -> Result<()> {
        let sql = Query::update()
            .table(schema::Deliveries::Table)
            .value(schema::Deliveries::Status, DELIVERY_STATUS_DONE)
            .value(schema::Deliveries::UpdatedAt, now())
            .and_where(Expr::col(schema::Deliveries::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }

    /// Count a failed dispatch attempt, leaving the row pending.
    pub async fn record_attempt(&mut self, delivery: &Delivery) -> Result<()> {
        let sql = Query::update()
            .table(schema::Deliveries::Table)
            .value(schema::Deliveries::Attempts, delivery.attempts + 1)
            .value(schema::Deliveries::UpdatedAt, now())
            .and_where(Expr::col(schema::Deliveries::Id).eq(delivery.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(())
    }
}
