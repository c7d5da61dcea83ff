use std::collections::HashMap;
use std::sync::RwLock;

use mesa_core::{AggregateRoot, ExpectedVersion, OrderId};
use mesa_orders::{Order, OrderSnapshot};

use super::{OrderRepository, OrderStoreError};

/// In-memory order store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, OrderSnapshot>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(orders.get(&order_id).cloned().map(Order::from_snapshot))
    }

    async fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<(), OrderStoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| OrderStoreError::Unavailable("lock poisoned".to_string()))?;

        let current = orders.get(&order.id_typed()).map(|o| o.version).unwrap_or(0);
        if !expected.matches(current) {
            return Err(OrderStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }
        if order.version() <= current {
            return Err(OrderStoreError::Concurrency(format!(
                "order version {} does not advance stored version {current}",
                order.version()
            )));
        }

        orders.insert(order.id_typed(), order.snapshot());
        Ok(())
    }
}
