use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Utc;

use mesa_core::{OrderId, ProductId};
use mesa_inventory::{
    Demand, Shortfall, StockDirection, StockError, StockMutation, StockRecord, StockSnapshot,
    UnresolvedProductPolicy, low_stock_records, plan_decrease, plan_restore,
};

use super::r#trait::{StockStore, StockStoreError};

#[derive(Debug, Default)]
struct StockState {
    records: BTreeMap<ProductId, StockRecord>,
    ledger: HashMap<(OrderId, StockDirection), StockMutation>,
    /// Commits that will fail (and roll back) before anything is written.
    failing_commits: usize,
}

/// Staged writes of one transaction. Dropping it without `commit` discards
/// everything, which is the rollback.
struct StagedTransaction<'a> {
    state: &'a mut StockState,
    snapshot: StockSnapshot,
}

impl<'a> StagedTransaction<'a> {
    /// Copy the involved records out of the store. The caller holds the store
    /// lock, so the copies cannot change underneath the transaction.
    fn begin(state: &'a mut StockState, product_ids: &[ProductId]) -> Self {
        let snapshot = product_ids
            .iter()
            .filter_map(|id| state.records.get(id).map(|r| (*id, r.clone())))
            .collect();
        Self { state, snapshot }
    }

    fn commit(mut self, mutation: &StockMutation) -> Result<(), StockStoreError> {
        if self.state.failing_commits > 0 {
            self.state.failing_commits -= 1;
            return Err(StockStoreError::Transaction(format!(
                "injected commit failure for {} of order {}",
                mutation.direction, mutation.order_id
            )));
        }

        // Same guard as the conditional UPDATE in Postgres.
        let negative: Vec<Shortfall> = self
            .snapshot
            .values()
            .filter(|r| r.quantity < 0)
            .map(|r| Shortfall {
                product_id: r.product_id,
                name: r.name.clone(),
                requested: mutation
                    .change_for(&r.product_id)
                    .map(|c| c.requested)
                    .unwrap_or_default(),
                available: r.quantity,
            })
            .collect();
        if !negative.is_empty() {
            return Err(StockError::InsufficientStock(negative).into());
        }

        for (id, record) in self.snapshot {
            self.state.records.insert(id, record);
        }
        self.state
            .ledger
            .insert((mutation.order_id, mutation.direction), mutation.clone());
        Ok(())
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. Transactions are serialised behind one mutex and
/// stage their writes, so a failed transaction leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: Mutex<StockState>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with records, validating each one.
    pub fn with_records(
        records: impl IntoIterator<Item = StockRecord>,
    ) -> Result<Self, StockStoreError> {
        let store = Self::new();
        {
            let mut state = store.lock()?;
            for record in records {
                record.validate().map_err(StockError::from)?;
                state.records.insert(record.product_id, record);
            }
        }
        Ok(store)
    }

    /// Make the next `count` commits fail as a system error (rolled back).
    pub fn fail_next_commits(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_commits = count;
        }
    }

    /// Current quantity of a product, if the record exists.
    pub fn quantity(&self, product_id: &ProductId) -> Option<i64> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(product_id).map(|r| r.quantity))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StockState>, StockStoreError> {
        self.state
            .lock()
            .map_err(|_| StockStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn run_decrease(
        &self,
        order_id: OrderId,
        demand: &Demand,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        let mut state = self.lock()?;
        if let Some(recorded) = state.ledger.get(&(order_id, StockDirection::Decrease)) {
            return Ok(recorded.clone().into_replay());
        }

        let mut tx = StagedTransaction::begin(&mut state, &demand.product_ids());
        let plan = plan_decrease(&tx.snapshot, demand, policy)?;
        plan.apply_to(&mut tx.snapshot);
        let mutation = plan.into_mutation(order_id, Utc::now());
        tx.commit(&mutation)?;
        Ok(mutation)
    }

    fn run_restore(
        &self,
        order_id: OrderId,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        let mut state = self.lock()?;
        if let Some(recorded) = state.ledger.get(&(order_id, StockDirection::Restore)) {
            return Ok(recorded.clone().into_replay());
        }
        let demand = match state.ledger.get(&(order_id, StockDirection::Decrease)) {
            Some(decrease) => Demand::from_recorded(decrease),
            None => return Err(StockError::NotDecreased { order_id }.into()),
        };

        let mut tx = StagedTransaction::begin(&mut state, &demand.product_ids());
        let plan = plan_restore(&tx.snapshot, &demand, policy)?;
        plan.apply_to(&mut tx.snapshot);
        let mutation = plan.into_mutation(order_id, Utc::now());
        tx.commit(&mutation)?;
        Ok(mutation)
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryStockStore {
    async fn fetch(&self, product_ids: &[ProductId]) -> Result<StockSnapshot, StockStoreError> {
        let state = self.lock()?;
        Ok(product_ids
            .iter()
            .filter_map(|id| state.records.get(id).map(|r| (*id, r.clone())))
            .collect())
    }

    async fn decrease(
        &self,
        order_id: OrderId,
        demand: &Demand,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        self.run_decrease(order_id, demand, policy)
    }

    async fn restore(
        &self,
        order_id: OrderId,
        policy: UnresolvedProductPolicy,
    ) -> Result<StockMutation, StockStoreError> {
        self.run_restore(order_id, policy)
    }

    async fn list_low_stock(&self) -> Result<Vec<StockRecord>, StockStoreError> {
        let state = self.lock()?;
        Ok(low_stock_records(state.records.values()))
    }

    async fn put_record(&self, mut record: StockRecord) -> Result<(), StockStoreError> {
        record.validate().map_err(StockError::from)?;
        let mut state = self.lock()?;
        if let Some(existing) = state.records.get(&record.product_id) {
            record.quantity = existing.quantity;
        }
        state.records.insert(record.product_id, record);
        Ok(())
    }

    async fn ledger_entry(
        &self,
        order_id: OrderId,
        direction: StockDirection,
    ) -> Result<Option<StockMutation>, StockStoreError> {
        let state = self.lock()?;
        Ok(state.ledger.get(&(order_id, direction)).cloned())
    }
}
