//! Postgres-backed stock store.
//!
//! ## Locking
//!
//! A mutation claims its ledger row first (`INSERT ... ON CONFLICT DO
//! NOTHING`). A conflicting insert waits for the other transaction, so a
//! missing claim means the entry is already committed and is replayed.
//! Product rows are then locked with `SELECT ... ORDER BY id FOR UPDATE`; the
//! ascending order is shared by every caller, so concurrent mutations over
//! overlapping products cannot deadlock.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StockStoreError |
//! |------------|-----------------|
//! | PoolClosed, Io, PoolTimedOut | `Unavailable` |
//! | Database, other | `Transaction` |
//! | Row decode failure | `Corrupt` |
//!
//! Every error path drops the open transaction, which rolls it back.

use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use mesa_core::{OrderId, ProductId};
use mesa_inventory::{
    Demand, Shortfall, StockDirection, StockError, StockMutation, StockPlan, StockRecord,
    StockSnapshot, UnresolvedProductPolicy, plan_decrease, plan_restore,
};

use super::r#trait::{StockStore, StockStoreError};

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StockStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Connect using `DATABASE_URL`.
    pub async fn connect_from_env() -> Result<Self, StockStoreError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| StockStoreError::Unavailable("DATABASE_URL is not set".to_string()))?;
        Self::connect(&url).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations (products, stock_ledger, orders).
    pub async fn ensure_schema(&self) -> Result<(), StockStoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StockStoreError::Unavailable(format!("migration failed: {e}")))
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StockStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self), fields(products = product_ids.len()), err)]
    async fn fetch(&self, product_ids: &[ProductId]) -> Result<StockSnapshot, StockStoreError> {
        let ids: Vec<Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, name, tracked, quantity, low_stock_threshold, active
            FROM products
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch", e))?;

        rows_to_snapshot(rows)
    }

    #[instrument(skip(self, demand), fields(order_id = %order_id, products = demand.product_ids().len()), err)]
    async fn decrease(
        &self,
        order_id: OrderId,
        demand: &Demand,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        let mut tx = self.begin().await?;

        if !claim_ledger_entry(&mut tx, order_id, StockDirection::Decrease).await? {
            drop(tx);
            return self.replay(order_id, StockDirection::Decrease).await;
        }

        let snapshot = lock_products(&mut tx, &demand.product_ids()).await?;
        let plan = plan_decrease(&snapshot, demand, policy)?;
        apply_plan(&mut tx, &plan).await?;

        let mutation = plan.into_mutation(order_id, Utc::now());
        record_ledger_entry(&mut tx, &mutation).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        debug!(changes = mutation.changes.len(), "decrease committed");
        Ok(mutation)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn restore(
        &self,
        order_id: OrderId,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        let mut tx = self.begin().await?;

        if !claim_ledger_entry(&mut tx, order_id, StockDirection::Restore).await? {
            drop(tx);
            return self.replay(order_id, StockDirection::Restore).await;
        }

        let decrease = match load_ledger_entry(&mut *tx, order_id, StockDirection::Decrease).await? {
            Some(decrease) => decrease,
            None => return Err(StockError::NotDecreased { order_id }.into()),
        };
        let demand = Demand::from_recorded(&decrease);

        let snapshot = lock_products(&mut tx, &demand.product_ids()).await?;
        let plan = plan_restore(&snapshot, &demand, policy)?;
        apply_plan(&mut tx, &plan).await?;

        let mutation = plan.into_mutation(order_id, Utc::now());
        record_ledger_entry(&mut tx, &mutation).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        debug!(changes = mutation.changes.len(), "restore committed");
        Ok(mutation)
    }

    #[instrument(skip(self), err)]
    async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, tracked, quantity, low_stock_threshold, active
            FROM products
            WHERE tracked AND active AND quantity <= low_stock_threshold
            ORDER BY id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_low_stock", e))?;

        Ok(rows_to_snapshot(rows)?.into_values().collect())
    }

    #[instrument(skip(self, record), fields(product_id = %record.product_id), err)]
    async fn put_record(&self, record: StockRecord) -> Result<(), StockStoreError> {
        record.validate().map_err(StockError::from)?;

        sqlx::query(
            r#"
            INSERT INTO products (id, name, tracked, quantity, low_stock_threshold, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET
                name = EXCLUDED.name,
                tracked = EXCLUDED.tracked,
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                active = EXCLUDED.active,
                updated_at = NOW()
            "#,
        )
        .bind(record.product_id.as_uuid())
        .bind(&record.name)
        .bind(record.tracked)
        .bind(record.quantity)
        .bind(record.low_stock_threshold)
        .bind(record.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_record", e))?;

        Ok(())
    }

    async fn ledger_entry(
        &self,
        order_id: OrderId,
        direction: StockDirection,
    ) -> Result<Option<StockMutation>, StockStoreError> {
        load_ledger_entry(&*self.pool, order_id, direction).await
    }
}

impl PostgresStockStore {
    async fn replay(
        &self,
        order_id: OrderId,
        direction: StockDirection,
    ) -> Result<StockMutation, StockStoreError> {
        load_ledger_entry(&*self.pool, order_id, direction)
            .await?
            .map(StockMutation::into_replay)
            .ok_or_else(|| {
                StockStoreError::Corrupt(format!(
                    "ledger entry {direction} for order {order_id} has no recorded mutation"
                ))
            })
    }
}

/// Returns `false` when the entry already exists.
async fn claim_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    direction: StockDirection,
) -> Result<bool, StockStoreError> {
    let claimed = sqlx::query(
        r#"
        INSERT INTO stock_ledger (order_id, direction)
        VALUES ($1, $2)
        ON CONFLICT (order_id, direction) DO NOTHING
        RETURNING order_id
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(direction.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("claim_ledger_entry", e))?;

    Ok(claimed.is_some())
}

async fn record_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    mutation: &StockMutation,
) -> Result<(), StockStoreError> {
    let payload = serde_json::to_value(mutation)
        .map_err(|e| StockStoreError::Transaction(format!("mutation serialization failed: {e}")))?;

    sqlx::query(
        r#"
        UPDATE stock_ledger
        SET mutation = $3, recorded_at = $4
        WHERE order_id = $1 AND direction = $2
        "#,
    )
    .bind(mutation.order_id.as_uuid())
    .bind(mutation.direction.as_str())
    .bind(&payload)
    .bind(mutation.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("record_ledger_entry", e))?;

    Ok(())
}

async fn load_ledger_entry<'e, E>(
    executor: E,
    order_id: OrderId,
    direction: StockDirection,
) -> Result<Option<StockMutation>, StockStoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT mutation
        FROM stock_ledger
        WHERE order_id = $1 AND direction = $2 AND mutation IS NOT NULL
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(direction.as_str())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("load_ledger_entry", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let payload: serde_json::Value = row
        .try_get("mutation")
        .map_err(|e| StockStoreError::Corrupt(format!("failed to read mutation: {e}")))?;
    serde_json::from_value(payload)
        .map(Some)
        .map_err(|e| StockStoreError::Corrupt(format!("failed to decode mutation: {e}")))
}

async fn lock_products(
    tx: &mut Transaction<'_, Postgres>,
    product_ids: &[ProductId],
) -> Result<StockSnapshot, StockStoreError> {
    let ids: Vec<Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT id, name, tracked, quantity, low_stock_threshold, active
        FROM products
        WHERE id = ANY($1)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_products", e))?;

    rows_to_snapshot(rows)
}

async fn apply_plan(
    tx: &mut Transaction<'_, Postgres>,
    plan: &StockPlan,
) -> Result<(), StockStoreError> {
    for change in &plan.changes {
        let updated = match plan.direction {
            StockDirection::Decrease => sqlx::query(
                r#"
                UPDATE products
                SET quantity = quantity - $1, updated_at = NOW()
                WHERE id = $2 AND quantity >= $1
                RETURNING quantity
                "#,
            ),
            StockDirection::Restore => sqlx::query(
                r#"
                UPDATE products
                SET quantity = quantity + $1, updated_at = NOW()
                WHERE id = $2
                RETURNING quantity
                "#,
            ),
        }
        .bind(change.requested)
        .bind(change.product_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("apply_plan", e))?;

        // The rows are locked, so this only trips if the plan and the table disagree.
        if updated.is_none() {
            return Err(StockError::InsufficientStock(vec![Shortfall {
                product_id: change.product_id,
                name: change.name.clone(),
                requested: change.requested,
                available: change.before,
            }])
            .into());
        }
    }
    Ok(())
}

fn rows_to_snapshot(rows: Vec<PgRow>) -> Result<StockSnapshot, StockStoreError> {
    rows.iter()
        .map(|row| {
            let record = StockRecordRow::from_row(row)
                .map_err(|e| StockStoreError::Corrupt(format!("failed to decode product row: {e}")))?
                .into_record();
            Ok((record.product_id, record))
        })
        .collect()
}

/// Map SQLx errors to StockStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockStoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StockStoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StockStoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Database(db_err) => StockStoreError::Transaction(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        other => StockStoreError::Transaction(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct StockRecordRow {
    id: Uuid,
    name: String,
    tracked: bool,
    quantity: i64,
    low_stock_threshold: i64,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StockRecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockRecordRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            tracked: row.try_get("tracked")?,
            quantity: row.try_get("quantity")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            active: row.try_get("active")?,
        })
    }
}

impl StockRecordRow {
    fn into_record(self) -> StockRecord {
        StockRecord {
            product_id: ProductId::from_uuid(self.id),
            name: self.name,
            tracked: self.tracked,
            quantity: self.quantity,
            low_stock_threshold: self.low_stock_threshold,
            active: self.active,
        }
    }
}
