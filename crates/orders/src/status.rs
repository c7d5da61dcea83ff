//! Order statuses and the transition table.

use serde::{Deserialize, Serialize};

use crate::order::OrderKind;

/// Order status lifecycle.
///
/// Happy path: `Pending → Accepted → Preparing → Ready → Delivered`.
/// `Rejected` and `Cancelled` are terminal alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Ready,
    Delivered,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "accepted" => Ok(OrderStatus::Accepted),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "delivered" => Ok(OrderStatus::Delivered),
            "rejected" => Ok(OrderStatus::Rejected),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Stock operation a transition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockEffect {
    None,
    Decrease,
    Restore,
}

/// The transition table. `None` means the move is not allowed.
///
/// Only in-house orders can be cancelled. Stock is consumed on acceptance, so
/// leaving `Accepted`/`Preparing` for a terminal state gives it back, while a
/// terminal move from `Pending` has nothing to restore.
pub fn transition_effect(kind: OrderKind, from: OrderStatus, to: OrderStatus) -> Option<StockEffect> {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Accepted) => Some(StockEffect::Decrease),
        (Pending, Rejected) => Some(StockEffect::None),
        (Pending, Cancelled) if kind == OrderKind::InHouse => Some(StockEffect::None),
        (Accepted | Preparing, Rejected) => Some(StockEffect::Restore),
        (Accepted | Preparing, Cancelled) if kind == OrderKind::InHouse => Some(StockEffect::Restore),
        (Accepted, Preparing) | (Preparing, Ready) | (Ready, Delivered) => Some(StockEffect::None),
        _ => None,
    }
}
