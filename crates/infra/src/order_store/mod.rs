//! Order persistence with optimistic concurrency.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use mesa_core::{ExpectedVersion, OrderId};
use mesa_orders::Order;

pub use in_memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt order data: {0}")]
    Corrupt(String),
}

/// Stores the current state of each order.
///
/// `save` compares `expected` against the stored version (0 for an order that
/// has not been saved yet) and fails with `Concurrency` on a mismatch.
#[async_trait::async_trait]
pub trait OrderRepository: Send + Sync {
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError>;

    async fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<(), OrderStoreError>;
}

#[async_trait::async_trait]
impl<R> OrderRepository for Arc<R>
where
    R: OrderRepository + ?Sized,
{
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        (**self).load(order_id).await
    }

    async fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<(), OrderStoreError> {
        (**self).save(order, expected).await
    }
}
