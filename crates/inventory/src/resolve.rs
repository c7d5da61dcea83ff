//! Resolution of a referenced product against a snapshot.

use serde::{Deserialize, Serialize};

use mesa_core::ProductId;

use crate::error::StockError;
use crate::mutation::SkipReason;
use crate::record::{StockRecord, StockSnapshot};

/// What to do when a line item references a product that is missing or
/// inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedProductPolicy {
    /// Leave the line out of every stock operation and report it as skipped.
    #[default]
    Skip,
    /// Fail the operation with `StockError::ProductUnresolvable`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolved<'a> {
    Tracked(&'a StockRecord),
    Untracked(&'a StockRecord),
    Skipped(SkipReason),
}

pub(crate) fn resolve(
    snapshot: &StockSnapshot,
    product_id: ProductId,
    policy: UnresolvedProductPolicy,
) -> Result<Resolved<'_>, StockError> {
    let resolved = match snapshot.get(&product_id) {
        None => Resolved::Skipped(SkipReason::Missing),
        Some(record) if !record.active => Resolved::Skipped(SkipReason::Inactive),
        Some(record) if !record.tracked => Resolved::Untracked(record),
        Some(record) => Resolved::Tracked(record),
    };

    match (resolved, policy) {
        (Resolved::Skipped(reason), UnresolvedProductPolicy::Reject) => {
            Err(StockError::ProductUnresolvable { product_id, reason })
        }
        (resolved, _) => Ok(resolved),
    }
}
