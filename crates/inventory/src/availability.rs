//! Advisory availability check.
//!
//! A diagnostic read against a snapshot; quantities can change before the
//! authoritative decrease runs, so a clean report guarantees nothing.

use serde::{Deserialize, Serialize};

use mesa_core::ProductId;

use crate::error::StockError;
use crate::line_item::Demand;
use crate::mutation::{Shortfall, SkippedLine};
use crate::record::StockSnapshot;
use crate::resolve::{Resolved, UnresolvedProductPolicy, resolve};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    /// Distinct products examined.
    pub checked: usize,
    pub shortfalls: Vec<Shortfall>,
    pub untracked: Vec<ProductId>,
    pub skipped: Vec<SkippedLine>,
}

impl AvailabilityReport {
    pub fn is_available(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

/// Compare a demand against a snapshot, collecting every shortfall.
pub fn check_availability(
    snapshot: &StockSnapshot,
    demand: &Demand,
    policy: UnresolvedProductPolicy,
) -> Result<AvailabilityReport, StockError> {
    let mut report = AvailabilityReport::default();

    for (product_id, requested) in demand.iter() {
        report.checked += 1;
        match resolve(snapshot, product_id, policy)? {
            Resolved::Skipped(reason) => report.skipped.push(SkippedLine { product_id, reason }),
            Resolved::Untracked(_) => report.untracked.push(product_id),
            Resolved::Tracked(record) => {
                if !record.can_supply(requested) {
                    report.shortfalls.push(Shortfall {
                        product_id,
                        name: record.name.clone(),
                        requested,
                        available: record.quantity,
                    });
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::OrderLineItem;
    use crate::mutation::SkipReason;
    use crate::record::{StockRecord, snapshot_of};

    fn demand(lines: &[(ProductId, i64)]) -> Demand {
        let items: Vec<OrderLineItem> = lines
            .iter()
            .map(|(id, qty)| OrderLineItem::new(*id, *qty, 100).unwrap())
            .collect();
        Demand::from_lines(&items).unwrap()
    }

    #[test]
    fn reports_every_shortfall_without_short_circuiting() {
        let a = StockRecord::tracked(ProductId::new(), "Arepa", 2, 1).unwrap();
        let b = StockRecord::tracked(ProductId::new(), "Bolon", 0, 1).unwrap();
        let snapshot = snapshot_of([a.clone(), b.clone()]);

        let report = check_availability(
            &snapshot,
            &demand(&[(a.product_id, 3), (b.product_id, 1)]),
            UnresolvedProductPolicy::Skip,
        )
        .unwrap();

        assert!(!report.is_available());
        assert_eq!(report.shortfalls.len(), 2);
        assert_eq!(report.checked, 2);
    }

    #[test]
    fn exact_quantity_is_available() {
        let a = StockRecord::tracked(ProductId::new(), "Arepa", 3, 1).unwrap();
        let snapshot = snapshot_of([a.clone()]);

        let report =
            check_availability(&snapshot, &demand(&[(a.product_id, 3)]), UnresolvedProductPolicy::Skip)
                .unwrap();

        assert!(report.is_available());
    }

    #[test]
    fn untracked_and_inactive_products_never_fall_short() {
        let untracked = StockRecord::untracked(ProductId::new(), "Bread basket");
        let inactive = StockRecord::tracked(ProductId::new(), "Seasonal pie", 0, 0)
            .unwrap()
            .with_active(false);
        let missing = ProductId::new();
        let snapshot = snapshot_of([untracked.clone(), inactive.clone()]);

        let report = check_availability(
            &snapshot,
            &demand(&[(untracked.product_id, 50), (inactive.product_id, 2), (missing, 1)]),
            UnresolvedProductPolicy::Skip,
        )
        .unwrap();

        assert!(report.is_available());
        assert_eq!(report.untracked, vec![untracked.product_id]);
        assert_eq!(report.skipped.len(), 2);
        assert!(
            report
                .skipped
                .iter()
                .any(|s| s.product_id == missing && s.reason == SkipReason::Missing)
        );
    }

    #[test]
    fn reject_policy_turns_inactive_products_into_errors() {
        let inactive = StockRecord::tracked(ProductId::new(), "Seasonal pie", 4, 0)
            .unwrap()
            .with_active(false);
        let snapshot = snapshot_of([inactive.clone()]);

        let err = check_availability(
            &snapshot,
            &demand(&[(inactive.product_id, 1)]),
            UnresolvedProductPolicy::Reject,
        )
        .unwrap_err();

        assert_eq!(
            err,
            StockError::ProductUnresolvable {
                product_id: inactive.product_id,
                reason: SkipReason::Inactive,
            }
        );
    }
}
