//! Orders domain module.
//!
//! The order status state machine for online and in-house orders, implemented
//! as deterministic domain logic (no IO, no storage). The aggregate decides
//! which transitions are legal and which stock effect each one carries; the
//! orchestration layer in `mesa-infra` performs the effect.

pub mod order;
pub mod status;

pub use order::{
    AcceptOrder, AdvanceOrder, CancelOrder, Order, OrderAccepted, OrderAdvanced, OrderCancelled,
    OrderCommand, OrderEvent, OrderKind, OrderPlaced, OrderRejected, OrderSnapshot, PlaceOrder,
    RejectOrder,
};
pub use status::{OrderStatus, StockEffect, transition_effect};
