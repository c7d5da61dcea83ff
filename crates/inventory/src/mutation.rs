use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesa_core::{OrderId, ProductId, ValueObject};

use crate::low_stock::LowStockAlert;

/// Which way stock moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    Decrease,
    Restore,
}

impl StockDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockDirection::Decrease => "decrease",
            StockDirection::Restore => "restore",
        }
    }
}

impl core::fmt::Display for StockDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for StockDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decrease" => Ok(StockDirection::Decrease),
            "restore" => Ok(StockDirection::Restore),
            other => Err(format!("unknown stock direction '{other}'")),
        }
    }
}

/// Quantity change applied to one tracked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: ProductId,
    pub name: String,
    pub requested: i64,
    pub before: i64,
    pub after: i64,
    pub threshold: i64,
}

/// Why a referenced product took no part in a stock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    Missing,
    Inactive,
}

impl core::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SkipReason::Missing => f.write_str("product does not exist"),
            SkipReason::Inactive => f.write_str("product is inactive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub product_id: ProductId,
    pub reason: SkipReason,
}

/// Deficit between what was requested and what a tracked product holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub product_id: ProductId,
    pub name: String,
    pub requested: i64,
    pub available: i64,
}

impl ValueObject for Shortfall {}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} ({}) requested {}, available {}",
            self.name, self.product_id, self.requested, self.available
        )
    }
}

/// Committed outcome of a decrease or restore for one order.
///
/// This is also what the stock ledger records; a repeated call for the same
/// `(order_id, direction)` hands the recorded value back with `replayed` set
/// and touches no stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMutation {
    pub order_id: OrderId,
    pub direction: StockDirection,
    pub changes: Vec<StockChange>,
    /// Products that were processed but have no tracked stock.
    pub untracked: Vec<ProductId>,
    pub skipped: Vec<SkippedLine>,
    /// Number of line items processed, untracked ones included.
    pub processed: usize,
    pub alerts: Vec<LowStockAlert>,
    #[serde(default)]
    pub replayed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl StockMutation {
    /// Mark a ledger hit: the stock effect happened in an earlier call.
    pub fn into_replay(mut self) -> Self {
        self.replayed = true;
        self
    }

    pub fn change_for(&self, product_id: &ProductId) -> Option<&StockChange> {
        self.changes.iter().find(|c| &c.product_id == product_id)
    }
}
