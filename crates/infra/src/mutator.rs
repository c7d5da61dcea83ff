//! Transactional stock mutation service.
//!
//! Wraps a `StockStore` with the request-level rules: items are validated
//! before any transaction starts, every store call is bounded by the
//! configured timeout, and only system errors are retried.

use std::future::Future;

use tracing::{info, instrument, warn};

use mesa_core::OrderId;
use mesa_inventory::{Demand, OrderLineItem, StockDirection, StockError, StockMutation};

use crate::config::FulfillmentConfig;
use crate::stock_store::{StockStore, StockStoreError};

#[derive(Debug, Clone)]
pub struct StockMutator<S> {
    store: S,
    config: FulfillmentConfig,
}

impl<S> StockMutator<S>
where
    S: StockStore,
{
    pub fn new(store: S, config: FulfillmentConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    /// Decrease stock for every tracked, active product of the order, or
    /// nothing at all. A second call for the same order replays the first.
    #[instrument(skip(self, items), fields(order_id = %order_id, items = items.len()))]
    pub async fn decrease(
        &self,
        order_id: OrderId,
        items: &[OrderLineItem],
    ) -> Result<StockMutation, StockError> {
        let demand = validated_demand(items)?;
        let policy = self.config.unresolved_products;

        let mutation = self
            .with_retries("decrease", || self.store.decrease(order_id, &demand, policy))
            .await
            .inspect_err(|err| log_failure("decrease", err))?;

        log_outcome(&mutation);
        Ok(mutation)
    }

    /// Give back what the recorded decrease for the order took. At most once
    /// per order; fails with `NotDecreased` when nothing was taken.
    #[instrument(skip(self, items), fields(order_id = %order_id, items = items.len()))]
    pub async fn restore(
        &self,
        order_id: OrderId,
        items: &[OrderLineItem],
    ) -> Result<StockMutation, StockError> {
        let demand = validated_demand(items)?;
        let policy = self.config.unresolved_products;

        let mutation = self
            .with_retries("restore", || self.store.restore(order_id, policy))
            .await
            .inspect_err(|err| log_failure("restore", err))?;

        let drifted = mutation
            .changes
            .iter()
            .any(|c| demand.requested(&c.product_id) != Some(c.requested));
        if drifted {
            warn!(
                order_id = %order_id,
                "restore items differ from the recorded decrease; restored the recorded quantities"
            );
        }

        log_outcome(&mutation);
        Ok(mutation)
    }

    /// The decrease recorded for the order, if its stock was ever taken.
    ///
    /// This is the source of truth for whether a closed order owes a restore;
    /// the order record can lag behind it when a save fails after the
    /// decrease committed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn recorded_decrease(
        &self,
        order_id: OrderId,
    ) -> Result<Option<StockMutation>, StockError> {
        self.with_retries("ledger_lookup", || {
            self.store.ledger_entry(order_id, StockDirection::Decrease)
        })
        .await
        .inspect_err(|err| log_failure("ledger_lookup", err))
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, StockError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StockStoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.transaction_timeout, call()).await
            {
                Ok(result) => result.map_err(StockError::from),
                // Dropping the in-flight future drops its transaction, which rolls it back.
                Err(_) => Err(StockError::system(format!(
                    "{operation} timed out after {:?}",
                    self.config.transaction_timeout
                ))),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.config.max_system_retries => {
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.config.max_system_retries,
                        error = %err,
                        "retrying stock operation after system error"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

pub(crate) fn validated_demand(items: &[OrderLineItem]) -> Result<Demand, StockError> {
    if items.is_empty() {
        return Err(StockError::Validation("no line items given".to_string()));
    }
    Ok(Demand::from_lines(items)?)
}

fn log_outcome(mutation: &StockMutation) {
    if !mutation.skipped.is_empty() {
        warn!(
            order_id = %mutation.order_id,
            direction = %mutation.direction,
            skipped = ?mutation.skipped,
            "stock operation skipped missing or inactive products"
        );
    }
    info!(
        order_id = %mutation.order_id,
        direction = %mutation.direction,
        changes = mutation.changes.len(),
        untracked = mutation.untracked.len(),
        processed = mutation.processed,
        alerts = mutation.alerts.len(),
        replayed = mutation.replayed,
        "stock {}", mutation.direction
    );
}

fn log_failure(operation: &'static str, err: &StockError) {
    match err {
        StockError::System(_) => warn!(operation, kind = err.kind(), error = %err, "stock operation failed"),
        _ => info!(operation, kind = err.kind(), error = %err, "stock operation refused"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mesa_core::ProductId;
    use mesa_inventory::{StockDirection, StockRecord, StockSnapshot, UnresolvedProductPolicy};

    use crate::stock_store::InMemoryStockStore;

    fn fast_config() -> FulfillmentConfig {
        FulfillmentConfig {
            transaction_timeout: Duration::from_millis(200),
            max_system_retries: 2,
            retry_backoff: Duration::from_millis(1),
            unresolved_products: UnresolvedProductPolicy::Skip,
        }
    }

    fn line(product_id: ProductId, quantity: i64) -> OrderLineItem {
        OrderLineItem::new(product_id, quantity, 100).unwrap()
    }

    /// Delays every mutation past the configured timeout `slow_calls` times.
    struct SlowStore {
        inner: InMemoryStockStore,
        slow_calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl StockStore for SlowStore {
        async fn fetch(
            &self,
            product_ids: &[ProductId],
        ) -> Result<StockSnapshot, StockStoreError> {
            self.inner.fetch(product_ids).await
        }

        async fn decrease(
            &self,
            order_id: OrderId,
            demand: &Demand,
            policy: UnresolvedProductPolicy,
        ) -> Result<StockMutation, StockStoreError> {
            if self
                .slow_calls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.decrease(order_id, demand, policy).await
        }

        async fn restore(
            &self,
            order_id: OrderId,
            policy: UnresolvedProductPolicy,
        ) -> Result<StockMutation, StockStoreError> {
            self.inner.restore(order_id, policy).await
        }

        async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockStoreError> {
            self.inner.list_low_stock().await
        }

        async fn put_record(&self, record: StockRecord) -> Result<(), StockStoreError> {
            self.inner.put_record(record).await
        }

        async fn ledger_entry(
            &self,
            order_id: OrderId,
            direction: StockDirection,
        ) -> Result<Option<StockMutation>, StockStoreError> {
            self.inner.ledger_entry(order_id, direction).await
        }
    }

    #[tokio::test]
    async fn empty_items_are_rejected_before_the_store() {
        let mutator = StockMutator::new(Arc::new(InMemoryStockStore::new()), fast_config());

        let err = mutator.decrease(OrderId::new(), &[]).await.unwrap_err();

        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn system_errors_are_retried_until_success() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(InMemoryStockStore::with_records([a]).unwrap());
        store.fail_next_commits(2);
        let mutator = StockMutator::new(store.clone(), fast_config());

        let mutation = mutator
            .decrease(OrderId::new(), &[line(a_id, 4)])
            .await
            .unwrap();

        assert!(!mutation.replayed);
        assert_eq!(store.quantity(&a_id), Some(6));
    }

    #[tokio::test]
    async fn system_errors_past_the_retry_budget_roll_back() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(InMemoryStockStore::with_records([a]).unwrap());
        store.fail_next_commits(3);
        let mutator = StockMutator::new(store.clone(), fast_config());

        let err = mutator
            .decrease(OrderId::new(), &[line(a_id, 4)])
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.quantity(&a_id), Some(10));
    }

    #[tokio::test]
    async fn insufficient_stock_is_never_retried() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 1, 0).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(InMemoryStockStore::with_records([a]).unwrap());
        let mutator = StockMutator::new(store.clone(), fast_config());

        let err = mutator
            .decrease(OrderId::new(), &[line(a_id, 2)])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(store.quantity(&a_id), Some(1));
    }

    #[tokio::test]
    async fn timeout_is_a_system_error_and_leaves_stock_untouched() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(SlowStore {
            inner: InMemoryStockStore::with_records([a]).unwrap(),
            slow_calls: AtomicUsize::new(usize::MAX),
            delay: Duration::from_millis(500),
        });
        let config = FulfillmentConfig {
            max_system_retries: 0,
            ..fast_config()
        };
        let mutator = StockMutator::new(store.clone(), config);

        let err = mutator
            .decrease(OrderId::new(), &[line(a_id, 4)])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "system_error");
        assert_eq!(store.inner.quantity(&a_id), Some(10));
    }

    #[tokio::test]
    async fn retry_after_timeout_applies_the_decrease_once() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(SlowStore {
            inner: InMemoryStockStore::with_records([a]).unwrap(),
            slow_calls: AtomicUsize::new(1),
            delay: Duration::from_millis(500),
        });
        let mutator = StockMutator::new(store.clone(), fast_config());
        let order_id = OrderId::new();

        mutator.decrease(order_id, &[line(a_id, 4)]).await.unwrap();
        let again = mutator.decrease(order_id, &[line(a_id, 4)]).await.unwrap();

        assert!(again.replayed);
        assert_eq!(store.inner.quantity(&a_id), Some(6));
    }

    #[tokio::test]
    async fn restore_replay_does_not_credit_twice() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let a_id = a.product_id;
        let store = Arc::new(InMemoryStockStore::with_records([a]).unwrap());
        let mutator = StockMutator::new(store.clone(), fast_config());
        let order_id = OrderId::new();
        let items = [line(a_id, 3)];

        mutator.decrease(order_id, &items).await.unwrap();
        let first = mutator.restore(order_id, &items).await.unwrap();
        let second = mutator.restore(order_id, &items).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(store.quantity(&a_id), Some(10));
    }

    #[tokio::test]
    async fn strict_policy_rejects_inactive_products() {
        let a = StockRecord::tracked(ProductId::new(), "Hummus", 10, 2).unwrap();
        let gone = StockRecord::tracked(ProductId::new(), "Old special", 5, 1)
            .unwrap()
            .with_active(false);
        let (a_id, gone_id) = (a.product_id, gone.product_id);
        let store = Arc::new(InMemoryStockStore::with_records([a, gone]).unwrap());
        let config = FulfillmentConfig {
            unresolved_products: UnresolvedProductPolicy::Reject,
            ..fast_config()
        };
        let mutator = StockMutator::new(store.clone(), config);

        let err = mutator
            .decrease(OrderId::new(), &[line(a_id, 1), line(gone_id, 1)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StockError::ProductUnresolvable { product_id, .. } if product_id == gone_id
        ));
        assert_eq!(store.quantity(&a_id), Some(10));
    }
}
