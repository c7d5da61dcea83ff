//! Store-backed availability checks.

use tracing::{debug, instrument};

use mesa_inventory::{
    AvailabilityReport, OrderLineItem, StockError, StockRecord, check_availability,
};

use crate::config::FulfillmentConfig;
use crate::mutator::validated_demand;
use crate::stock_store::StockStore;

/// Advisory, read-only stock checks.
///
/// Reads take no locks; the answer can be stale by the time a decrease runs,
/// and the decrease remains the only authoritative check.
#[derive(Debug, Clone)]
pub struct AvailabilityChecker<S> {
    store: S,
    config: FulfillmentConfig,
}

impl<S> AvailabilityChecker<S>
where
    S: StockStore,
{
    pub fn new(store: S, config: FulfillmentConfig) -> Self {
        Self { store, config }
    }

    /// Every shortfall of the items against current stock. Never short-circuits.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn check(&self, items: &[OrderLineItem]) -> Result<AvailabilityReport, StockError> {
        let demand = validated_demand(items)?;
        let snapshot = tokio::time::timeout(
            self.config.transaction_timeout,
            self.store.fetch(&demand.product_ids()),
        )
        .await
        .map_err(|_| StockError::system("availability read timed out"))??;

        let report = check_availability(&snapshot, &demand, self.config.unresolved_products)?;
        debug!(
            checked = report.checked,
            shortfalls = report.shortfalls.len(),
            skipped = report.skipped.len(),
            "availability checked"
        );
        Ok(report)
    }

    /// Tracked, active products at or below their threshold, by product id.
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockError> {
        tokio::time::timeout(self.config.transaction_timeout, self.store.list_low_stock())
            .await
            .map_err(|_| StockError::system("low stock listing timed out"))?
            .map_err(StockError::from)
    }
}
