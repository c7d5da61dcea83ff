//! Low-stock evaluation.
//!
//! Alerts are derived from the quantities a committed decrease left behind;
//! nothing here reads a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesa_core::{OrderId, ProductId, ValueObject};
use mesa_events::Event;

use crate::mutation::StockChange;
use crate::record::StockRecord;

/// A product that fell to or below its configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub name: String,
    pub current_quantity: i64,
    pub threshold: i64,
}

impl ValueObject for LowStockAlert {}

impl LowStockAlert {
    pub fn from_change(change: &StockChange) -> Option<Self> {
        (change.after <= change.threshold).then(|| Self {
            product_id: change.product_id,
            name: change.name.clone(),
            current_quantity: change.after,
            threshold: change.threshold,
        })
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.current_quantity == 0
    }
}

/// One alert per change whose new quantity is `<=` its threshold.
pub fn evaluate_low_stock(changes: &[StockChange]) -> Vec<LowStockAlert> {
    changes.iter().filter_map(LowStockAlert::from_change).collect()
}

/// Tracked, active records at or below threshold, in product order.
pub fn low_stock_records<'a>(records: impl IntoIterator<Item = &'a StockRecord>) -> Vec<StockRecord> {
    let mut low: Vec<StockRecord> = records.into_iter().filter(|r| r.is_low()).cloned().collect();
    low.sort_by_key(|r| r.product_id);
    low
}

/// Event: a decrease for `order_id` left a product low on stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockRaised {
    pub order_id: OrderId,
    pub alert: LowStockAlert,
    pub occurred_at: DateTime<Utc>,
}

impl Event for LowStockRaised {
    fn event_type(&self) -> &'static str {
        if self.alert.is_out_of_stock() {
            "inventory.stock.out"
        } else {
            "inventory.stock.low"
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(after: i64, threshold: i64) -> StockChange {
        StockChange {
            product_id: ProductId::new(),
            name: "Empanada".into(),
            requested: 1,
            before: after + 1,
            after,
            threshold,
        }
    }

    #[test]
    fn alert_fires_at_threshold_and_below() {
        let alerts = evaluate_low_stock(&[change(5, 5), change(4, 5), change(6, 5)]);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.current_quantity <= a.threshold));
    }

    #[test]
    fn zero_is_out_of_stock() {
        let alerts = evaluate_low_stock(&[change(0, 0)]);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].is_out_of_stock());

        let raised = LowStockRaised {
            order_id: OrderId::new(),
            alert: alerts[0].clone(),
            occurred_at: Utc::now(),
        };
        assert_eq!(raised.event_type(), "inventory.stock.out");
    }

    #[test]
    fn low_stock_records_skip_untracked_and_inactive() {
        let low = StockRecord::tracked(ProductId::new(), "Churros", 1, 3).unwrap();
        let inactive = StockRecord::tracked(ProductId::new(), "Mole", 0, 3)
            .unwrap()
            .with_active(false);
        let untracked = StockRecord::untracked(ProductId::new(), "Tap water");
        let plenty = StockRecord::tracked(ProductId::new(), "Rice", 40, 3).unwrap();

        let listed = low_stock_records([&low, &inactive, &untracked, &plenty]);

        assert_eq!(listed, vec![low]);
    }
}
