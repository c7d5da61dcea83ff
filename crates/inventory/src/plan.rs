//! Decrease/restore planning.
//!
//! A plan is computed from a snapshot of the (locked) records and either
//! covers every product of the demand or fails as a whole. Stores apply a
//! plan only inside the transaction that produced the snapshot, so a failed
//! plan leaves every quantity untouched.

use chrono::{DateTime, Utc};

use mesa_core::{OrderId, ProductId};

use crate::error::StockError;
use crate::line_item::Demand;
use crate::low_stock::evaluate_low_stock;
use crate::mutation::{Shortfall, SkippedLine, StockChange, StockDirection, StockMutation};
use crate::record::StockSnapshot;
use crate::resolve::{Resolved, UnresolvedProductPolicy, resolve};

/// Fully-decided stock movement for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPlan {
    pub direction: StockDirection,
    pub changes: Vec<StockChange>,
    pub untracked: Vec<ProductId>,
    pub skipped: Vec<SkippedLine>,
    pub processed: usize,
}

/// Plan a decrease: every tracked, active product must hold at least the
/// requested quantity, otherwise the whole plan fails with all shortfalls.
pub fn plan_decrease(
    snapshot: &StockSnapshot,
    demand: &Demand,
    policy: UnresolvedProductPolicy,
) -> Result<StockPlan, StockError> {
    let mut plan = StockPlan::empty(StockDirection::Decrease, demand);
    let mut shortfalls = Vec::new();

    for (product_id, requested) in demand.iter() {
        match resolve(snapshot, product_id, policy)? {
            Resolved::Skipped(reason) => plan.skipped.push(SkippedLine { product_id, reason }),
            Resolved::Untracked(_) => plan.untracked.push(product_id),
            Resolved::Tracked(record) if record.quantity < requested => {
                shortfalls.push(Shortfall {
                    product_id,
                    name: record.name.clone(),
                    requested,
                    available: record.quantity,
                });
            }
            Resolved::Tracked(record) => plan.changes.push(StockChange {
                product_id,
                name: record.name.clone(),
                requested,
                before: record.quantity,
                after: record.quantity - requested,
                threshold: record.low_stock_threshold,
            }),
        }
    }

    if !shortfalls.is_empty() {
        return Err(StockError::InsufficientStock(shortfalls));
    }
    Ok(plan)
}

/// Plan a restore: credit every tracked, active product. No upper bound.
pub fn plan_restore(
    snapshot: &StockSnapshot,
    demand: &Demand,
    policy: UnresolvedProductPolicy,
) -> Result<StockPlan, StockError> {
    let mut plan = StockPlan::empty(StockDirection::Restore, demand);

    for (product_id, requested) in demand.iter() {
        match resolve(snapshot, product_id, policy)? {
            Resolved::Skipped(reason) => plan.skipped.push(SkippedLine { product_id, reason }),
            Resolved::Untracked(_) => plan.untracked.push(product_id),
            Resolved::Tracked(record) => {
                let after = record.quantity.checked_add(requested).ok_or_else(|| {
                    StockError::Validation(format!(
                        "restoring {requested} to product {product_id} overflows its quantity"
                    ))
                })?;
                plan.changes.push(StockChange {
                    product_id,
                    name: record.name.clone(),
                    requested,
                    before: record.quantity,
                    after,
                    threshold: record.low_stock_threshold,
                });
            }
        }
    }

    Ok(plan)
}

impl StockPlan {
    fn empty(direction: StockDirection, demand: &Demand) -> Self {
        Self {
            direction,
            changes: Vec::new(),
            untracked: Vec::new(),
            skipped: Vec::new(),
            processed: demand.line_count(),
        }
    }

    /// Write the planned quantities into a snapshot.
    pub fn apply_to(&self, snapshot: &mut StockSnapshot) {
        for change in &self.changes {
            if let Some(record) = snapshot.get_mut(&change.product_id) {
                record.quantity = change.after;
            }
        }
    }

    /// Final, ledger-ready result. Low-stock alerts are only raised by decreases.
    pub fn into_mutation(self, order_id: OrderId, recorded_at: DateTime<Utc>) -> StockMutation {
        let alerts = match self.direction {
            StockDirection::Decrease => evaluate_low_stock(&self.changes),
            StockDirection::Restore => Vec::new(),
        };
        StockMutation {
            order_id,
            direction: self.direction,
            changes: self.changes,
            untracked: self.untracked,
            skipped: self.skipped,
            processed: self.processed,
            alerts,
            replayed: false,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::OrderLineItem;
    use crate::record::{StockRecord, snapshot_of};
    use proptest::prelude::*;

    fn items(lines: &[(ProductId, i64)]) -> Vec<OrderLineItem> {
        lines
            .iter()
            .map(|(id, qty)| OrderLineItem::new(*id, *qty, 250).unwrap())
            .collect()
    }

    fn demand(lines: &[(ProductId, i64)]) -> Demand {
        Demand::from_lines(&items(lines)).unwrap()
    }

    #[test]
    fn decrease_below_threshold_raises_alert() {
        let a = StockRecord::tracked(ProductId::new(), "Pupusa", 10, 5).unwrap();
        let snapshot = snapshot_of([a.clone()]);

        let plan = plan_decrease(&snapshot, &demand(&[(a.product_id, 6)]), UnresolvedProductPolicy::Skip)
            .unwrap();
        let mutation = plan.into_mutation(OrderId::new(), Utc::now());

        let change = mutation.change_for(&a.product_id).unwrap();
        assert_eq!((change.before, change.after), (10, 4));
        assert_eq!(mutation.alerts.len(), 1);
        assert_eq!(mutation.alerts[0].current_quantity, 4);
    }

    #[test]
    fn any_shortfall_fails_the_whole_plan() {
        let a = StockRecord::tracked(ProductId::new(), "Pupusa", 10, 5).unwrap();
        let b = StockRecord::tracked(ProductId::new(), "Horchata", 1, 0).unwrap();
        let snapshot = snapshot_of([a.clone(), b.clone()]);

        let err = plan_decrease(
            &snapshot,
            &demand(&[(a.product_id, 2), (b.product_id, 2)]),
            UnresolvedProductPolicy::Skip,
        )
        .unwrap_err();

        assert_eq!(
            err.shortfalls().unwrap(),
            &[Shortfall {
                product_id: b.product_id,
                name: "Horchata".into(),
                requested: 2,
                available: 1,
            }]
        );
    }

    #[test]
    fn untracked_lines_are_processed_without_changes() {
        let c = StockRecord::untracked(ProductId::new(), "Soda fountain");
        let snapshot = snapshot_of([c.clone()]);

        let plan = plan_decrease(&snapshot, &demand(&[(c.product_id, 1000)]), UnresolvedProductPolicy::Skip)
            .unwrap();

        assert!(plan.changes.is_empty());
        assert_eq!(plan.untracked, vec![c.product_id]);
        assert_eq!(plan.processed, 1);
    }

    #[test]
    fn restore_has_no_upper_bound_and_no_alerts() {
        let a = StockRecord::tracked(ProductId::new(), "Tamal", 0, 5).unwrap();
        let snapshot = snapshot_of([a.clone()]);

        let plan = plan_restore(&snapshot, &demand(&[(a.product_id, 1_000_000)]), UnresolvedProductPolicy::Skip)
            .unwrap();
        let mutation = plan.into_mutation(OrderId::new(), Utc::now());

        assert_eq!(mutation.changes[0].after, 1_000_000);
        assert!(mutation.alerts.is_empty());
    }

    #[test]
    fn inactive_products_are_not_restored() {
        let a = StockRecord::tracked(ProductId::new(), "Tamal", 2, 0)
            .unwrap()
            .with_active(false);
        let snapshot = snapshot_of([a.clone()]);

        let plan = plan_restore(&snapshot, &demand(&[(a.product_id, 3)]), UnresolvedProductPolicy::Skip)
            .unwrap();

        assert!(plan.changes.is_empty());
        assert_eq!(plan.skipped.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a successful decrease never drives a quantity below zero,
        /// and a failed one reports a shortfall for every product that cannot
        /// cover its demand.
        #[test]
        fn decrease_never_goes_negative(
            stock in prop::collection::vec((0i64..50, 0i64..10), 1..6),
            requests in prop::collection::vec((0usize..6, 1i64..30), 1..8),
        ) {
            let records: Vec<StockRecord> = stock
                .iter()
                .enumerate()
                .map(|(i, (qty, threshold))| {
                    StockRecord::tracked(ProductId::new(), format!("p{i}"), *qty, *threshold).unwrap()
                })
                .collect();
            let lines: Vec<(ProductId, i64)> = requests
                .iter()
                .map(|(idx, qty)| (records[idx % records.len()].product_id, *qty))
                .collect();
            let demand = demand(&lines);
            let mut snapshot = snapshot_of(records.clone());

            match plan_decrease(&snapshot, &demand, UnresolvedProductPolicy::Skip) {
                Ok(plan) => {
                    plan.apply_to(&mut snapshot);
                    prop_assert!(snapshot.values().all(|r| r.quantity >= 0));
                }
                Err(StockError::InsufficientStock(shortfalls)) => {
                    let expected = demand
                        .iter()
                        .filter(|(id, req)| snapshot[id].quantity < *req)
                        .count();
                    prop_assert_eq!(shortfalls.len(), expected);
                    prop_assert!(shortfalls.iter().all(|s| s.available < s.requested));
                }
                Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
            }
        }

        /// Property: restore(items) after decrease(items) returns every
        /// touched product to its original quantity.
        #[test]
        fn restore_is_the_exact_inverse_of_decrease(
            stock in prop::collection::vec(50i64..500, 1..6),
            requests in prop::collection::vec((0usize..6, 1i64..10), 1..8),
        ) {
            let records: Vec<StockRecord> = stock
                .iter()
                .enumerate()
                .map(|(i, qty)| StockRecord::tracked(ProductId::new(), format!("p{i}"), *qty, 5).unwrap())
                .collect();
            let lines: Vec<(ProductId, i64)> = requests
                .iter()
                .map(|(idx, qty)| (records[idx % records.len()].product_id, *qty))
                .collect();
            let demand = demand(&lines);
            let original = snapshot_of(records);
            let mut snapshot = original.clone();

            let decrease = plan_decrease(&snapshot, &demand, UnresolvedProductPolicy::Skip).unwrap();
            decrease.apply_to(&mut snapshot);
            let restore = plan_restore(&snapshot, &demand, UnresolvedProductPolicy::Skip).unwrap();
            restore.apply_to(&mut snapshot);

            prop_assert_eq!(snapshot, original);
        }
    }
}
