use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mesa_core::{DomainError, DomainResult, Entity, ProductId};

/// Per-product stock fields owned by the stock store.
///
/// `quantity` is only ever changed through the decrease/restore paths; the
/// other fields are product configuration synced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub name: String,
    /// Whether inventory is tracked at all; untracked products bypass every check.
    pub tracked: bool,
    pub quantity: i64,
    pub low_stock_threshold: i64,
    /// Inactive products are excluded from all stock operations.
    pub active: bool,
}

/// Point-in-time view of the records involved in one operation, in ascending
/// product order.
pub type StockSnapshot = BTreeMap<ProductId, StockRecord>;

impl StockRecord {
    /// An active, tracked product.
    pub fn tracked(
        product_id: ProductId,
        name: impl Into<String>,
        quantity: i64,
        low_stock_threshold: i64,
    ) -> DomainResult<Self> {
        let record = Self {
            product_id,
            name: name.into(),
            tracked: true,
            quantity,
            low_stock_threshold,
            active: true,
        };
        record.validate()?;
        Ok(record)
    }

    /// An active product whose stock is not tracked.
    pub fn untracked(product_id: ProductId, name: impl Into<String>) -> Self {
        Self {
            product_id,
            name: name.into(),
            tracked: false,
            quantity: 0,
            low_stock_threshold: 0,
            active: true,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity < 0 {
            return Err(DomainError::validation(format!(
                "quantity for product {} cannot be negative",
                self.product_id
            )));
        }
        if self.low_stock_threshold < 0 {
            return Err(DomainError::validation(format!(
                "low_stock_threshold for product {} cannot be negative",
                self.product_id
            )));
        }
        Ok(())
    }

    pub fn can_supply(&self, requested: i64) -> bool {
        !self.tracked || self.quantity >= requested
    }

    /// Tracked, active and at or below the threshold.
    pub fn is_low(&self) -> bool {
        self.tracked && self.active && self.quantity <= self.low_stock_threshold
    }
}

impl Entity for StockRecord {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }
}

/// Build a snapshot keyed by product id.
pub fn snapshot_of(records: impl IntoIterator<Item = StockRecord>) -> StockSnapshot {
    records.into_iter().map(|r| (r.product_id, r)).collect()
}
