//! Postgres-backed order store.
//!
//! Orders are stored as one row per order; `lines` is a JSONB copy of the
//! immutable line items. `save` locks the row with `FOR UPDATE` before the
//! version check, and a concurrent first insert surfaces as a unique
//! violation, which maps to `Concurrency`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mesa_core::{AggregateRoot, ExpectedVersion, OrderId};
use mesa_inventory::OrderLineItem;
use mesa_orders::{Order, OrderSnapshot};

use super::{OrderRepository, OrderStoreError};

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl OrderRepository for PostgresOrderStore {
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, order_number, kind, status, lines, stock_consumed,
                   status_reason, placed_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?;

        match row {
            Some(row) => {
                let snapshot = OrderRow::from_row(&row)
                    .map_err(|e| OrderStoreError::Corrupt(format!("failed to read order row: {e}")))?
                    .into_snapshot()?;
                Ok(Some(Order::from_snapshot(snapshot)))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), version = order.version(), expected = ?expected),
        err
    )]
    async fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<(), OrderStoreError> {
        let snapshot = order.snapshot();
        let lines = serde_json::to_value(&snapshot.lines)
            .map_err(|e| OrderStoreError::Corrupt(format!("lines serialization failed: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: i64 = sqlx::query("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
            .bind(snapshot.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_order_version", e))?
            .map(|row| row.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| OrderStoreError::Corrupt(format!("failed to read version: {e}")))?
            .unwrap_or(0);

        if !expected.matches(current as u64) {
            return Err(OrderStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, kind, status, lines, stock_consumed,
                status_reason, placed_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                stock_consumed = EXCLUDED.stock_consumed,
                status_reason = EXCLUDED.status_reason,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(&snapshot.order_number)
        .bind(snapshot.kind.as_str())
        .bind(snapshot.status.as_str())
        .bind(&lines)
        .bind(snapshot.stock_consumed)
        .bind(snapshot.status_reason.as_deref())
        .bind(snapshot.placed_at)
        .bind(snapshot.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_order", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OrderStoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            OrderStoreError::Concurrency(format!(
                "concurrent insert detected in {operation}: {}",
                db_err.message()
            ))
        }
        sqlx::Error::Database(db_err) => OrderStoreError::Unavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        other => OrderStoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    kind: String,
    status: String,
    lines: serde_json::Value,
    stock_consumed: bool,
    status_reason: Option<String>,
    placed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            lines: row.try_get("lines")?,
            stock_consumed: row.try_get("stock_consumed")?,
            status_reason: row.try_get("status_reason")?,
            placed_at: row.try_get("placed_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl OrderRow {
    fn into_snapshot(self) -> Result<OrderSnapshot, OrderStoreError> {
        let lines: Vec<OrderLineItem> = serde_json::from_value(self.lines)
            .map_err(|e| OrderStoreError::Corrupt(format!("order {}: bad lines: {e}", self.id)))?;
        Ok(OrderSnapshot {
            id: OrderId::from_uuid(self.id),
            order_number: self.order_number,
            kind: self.kind.parse().map_err(OrderStoreError::Corrupt)?,
            status: self.status.parse().map_err(OrderStoreError::Corrupt)?,
            lines,
            stock_consumed: self.stock_consumed,
            status_reason: self.status_reason,
            placed_at: self.placed_at,
            version: self.version as u64,
        })
    }
}
