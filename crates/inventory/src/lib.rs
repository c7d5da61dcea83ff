//! Inventory domain module.
//!
//! Business rules for per-product stock: which line items can be supplied,
//! how a decrease or restore changes each product's quantity, and which
//! products end up at or below their low-stock threshold. Everything here is
//! deterministic domain logic (no IO, no storage); the transactional stores
//! in `mesa-infra` lock the rows, call into these planners and persist the
//! outcome.

pub mod availability;
pub mod error;
pub mod line_item;
pub mod low_stock;
pub mod mutation;
pub mod plan;
pub mod record;
pub mod resolve;

pub use availability::{AvailabilityReport, check_availability};
pub use error::StockError;
pub use line_item::{Demand, LineItemInput, OrderLineItem};
pub use low_stock::{LowStockAlert, LowStockRaised, evaluate_low_stock, low_stock_records};
pub use mutation::{Shortfall, SkipReason, SkippedLine, StockChange, StockDirection, StockMutation};
pub use plan::{StockPlan, plan_decrease, plan_restore};
pub use record::{StockRecord, StockSnapshot, snapshot_of};
pub use resolve::UnresolvedProductPolicy;
