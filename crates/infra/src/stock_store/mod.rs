//! Stock storage boundary.
//!
//! The store owns every product's `quantity`. Only the transactional
//! `decrease`/`restore` paths change it; both are recorded in a ledger keyed
//! by `(order_id, direction)` so each happens at most once per order.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{StockStore, StockStoreError};
