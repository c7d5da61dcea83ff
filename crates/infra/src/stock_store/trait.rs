use std::sync::Arc;

use thiserror::Error;

use mesa_core::{OrderId, ProductId};
use mesa_inventory::{
    Demand, StockDirection, StockError, StockMutation, StockRecord, StockSnapshot,
    UnresolvedProductPolicy,
};

/// Stock store operation error.
///
/// `Rejected` carries a deterministic answer from planning (shortfalls,
/// unresolvable products, a restore with nothing to restore). Every other
/// variant is an infrastructure failure; the transaction it happened in has
/// been rolled back.
#[derive(Debug, Error)]
pub enum StockStoreError {
    #[error(transparent)]
    Rejected(StockError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl From<StockError> for StockStoreError {
    fn from(value: StockError) -> Self {
        StockStoreError::Rejected(value)
    }
}

impl From<StockStoreError> for StockError {
    fn from(value: StockStoreError) -> Self {
        match value {
            StockStoreError::Rejected(err) => err,
            other => StockError::system(other.to_string()),
        }
    }
}

/// Transactional per-product stock storage.
///
/// ## Mutation semantics
///
/// `decrease` and `restore` each run in one transaction that:
/// - claims the ledger entry for `(order_id, direction)`; an entry that is
///   already recorded is returned with `replayed = true` and nothing else
///   happens
/// - locks the involved product rows in ascending product order
/// - plans the movement with the pure planners from `mesa-inventory`
/// - writes every quantity and the ledger entry, or nothing
///
/// `restore` credits what the recorded decrease for the order actually took
/// and fails with `StockError::NotDecreased` when there is none.
///
/// ## Reads
///
/// `fetch` and `list_low_stock` are plain snapshot reads and take no locks.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    /// Current records for the given products, keyed by product id. Unknown
    /// ids are simply absent.
    async fn fetch(&self, product_ids: &[ProductId]) -> Result<StockSnapshot, StockStoreError>;

    async fn decrease(
        &self,
        order_id: OrderId,
        demand: &Demand,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError>;

    async fn restore(
        &self,
        order_id: OrderId,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError>;

    /// Tracked, active records at or below their threshold, by product id.
    async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockStoreError>;

    /// Create a product record with its opening quantity, or reconfigure an
    /// existing one (catalog sync). An existing record keeps its quantity:
    /// only `decrease` and `restore` change stock.
    async fn put_record(&self, record: StockRecord) -> Result<(), StockStoreError>;

    async fn ledger_entry(
        &self,
        order_id: OrderId,
        direction: StockDirection,
    ) -> Result<Option<StockMutation>, StockStoreError>;
}

#[async_trait::async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn fetch(&self, product_ids: &[ProductId]) -> Result<StockSnapshot, StockStoreError> {
        (**self).fetch(product_ids).await
    }

    async fn decrease(
        &self,
        order_id: OrderId,
        demand: &Demand,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        (**self).decrease(order_id, demand, policy).await
    }

    async fn restore(
        &self,
        order_id: OrderId,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        (**self).restore(order_id, policy).await
    }

    async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockStoreError> {
        (**self).list_low_stock().await
    }

    async fn put_record(&self, record: StockRecord) -> Result<(), StockStoreError> {
        (**self).put_record(record).await
    }

    async fn ledger_entry(
        &self,
        order_id: OrderId,
        direction: StockDirection,
    ) -> Result<Option<StockMutation>, StockStoreError> {
        (**self).ledger_entry(order_id, direction).await
    }
}
