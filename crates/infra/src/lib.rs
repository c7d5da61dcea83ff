//! Infrastructure layer: stock and order stores, the transactional stock
//! services and the order lifecycle orchestration.

pub mod availability;
pub mod config;
pub mod lifecycle;
pub mod mutator;
pub mod order_store;
pub mod stock_store;


pub use availability::AvailabilityChecker;
pub use config::{ConfigError, FulfillmentConfig};
pub use lifecycle::{
    AcceptOutcome, FulfillmentMessage, LifecycleError, OrderLifecycle, PlacedOrder,
};
pub use mutator::StockMutator;
pub use order_store::{InMemoryOrderStore, OrderRepository, OrderStoreError, PostgresOrderStore};
pub use stock_store::{InMemoryStockStore, PostgresStockStore, StockStore, StockStoreError};
