//! Order lifecycle orchestration.
//!
//! Composes the order aggregate, the order store, the stock services and the
//! event bus:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the order and decide the transition (pure aggregate)
//!   ↓
//! 2. Acceptance only: decrease stock (all or nothing, at most once)
//!   ↓
//! 3. Save the order (optimistic concurrency)
//!   ↓
//! 4. Rejection/cancellation: restore stock if the ledger holds a decrease
//!   ↓
//! 5. Publish order events and low-stock alerts (best-effort)
//! ```
//!
//! Stock and order rows live in separate transactions, so the order record
//! can lag behind the stock ledger (a decrease committed, the accepted order
//! not saved). Whether a closed order owes a restore is therefore read from
//! the ledger, never from the order. The ledger also makes both stock steps
//! replayable, so every partial failure is resolved by calling `accept`,
//! `reject`, `cancel` or `restock` again.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use mesa_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, OrderId};
use mesa_events::EventBus;
use mesa_inventory::{
    AvailabilityReport, LowStockRaised, Shortfall, StockError, StockMutation,
};
use mesa_orders::{
    AcceptOrder, AdvanceOrder, CancelOrder, Order, OrderCommand, OrderEvent, OrderStatus,
    PlaceOrder, RejectOrder,
};

use crate::availability::AvailabilityChecker;
use crate::config::FulfillmentConfig;
use crate::mutator::StockMutator;
use crate::order_store::{OrderRepository, OrderStoreError};
use crate::stock_store::StockStore;

/// Everything the fulfillment core publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentMessage {
    Order(OrderEvent),
    LowStock(LowStockRaised),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("order was modified concurrently: {0}")]
    Conflict(String),

    #[error("order store failed: {0}")]
    Store(OrderStoreError),

    /// The order is terminal but its stock was not given back yet.
    /// `OrderLifecycle::restock` finishes the job.
    #[error("order {order_id} is closed but its stock was not restored: {source}")]
    RestockPending {
        order_id: OrderId,
        source: StockError,
    },
}

impl From<OrderStoreError> for LifecycleError {
    fn from(value: OrderStoreError) -> Self {
        match value {
            OrderStoreError::Concurrency(msg) => LifecycleError::Conflict(msg),
            other => LifecycleError::Store(other),
        }
    }
}

impl LifecycleError {
    /// Whether calling the same operation again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Stock(err) => err.is_retryable(),
            LifecycleError::Conflict(_) | LifecycleError::RestockPending { .. } => true,
            LifecycleError::Store(OrderStoreError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// A freshly placed order and the advisory availability report for it.
///
/// `availability` is `None` when the check itself failed; placement does not
/// depend on it.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub availability: Option<AvailabilityReport>,
}

/// Outcome of an acceptance attempt that reached a decision.
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    Accepted {
        order: Order,
        mutation: StockMutation,
    },
    /// Stock could not cover the order; it was rejected and no stock changed.
    Rejected {
        order: Order,
        shortfalls: Vec<Shortfall>,
    },
}

impl AcceptOutcome {
    pub fn order(&self) -> &Order {
        match self {
            AcceptOutcome::Accepted { order, .. } | AcceptOutcome::Rejected { order, .. } => order,
        }
    }
}

pub struct OrderLifecycle<S, R, B> {
    mutator: StockMutator<S>,
    checker: AvailabilityChecker<S>,
    orders: R,
    bus: B,
}

impl<S, R, B> OrderLifecycle<S, R, B>
where
    S: StockStore + Clone,
    R: OrderRepository,
    B: EventBus<FulfillmentMessage>,
{
    pub fn new(stock: S, orders: R, bus: B, config: FulfillmentConfig) -> Self {
        Self {
            mutator: StockMutator::new(stock.clone(), config),
            checker: AvailabilityChecker::new(stock, config),
            orders,
            bus,
        }
    }

    pub fn mutator(&self) -> &StockMutator<S> {
        &self.mutator
    }

    pub fn checker(&self) -> &AvailabilityChecker<S> {
        &self.checker
    }

    /// Store a new pending order and run the advisory availability check.
    #[instrument(skip(self, cmd), fields(order_id = %cmd.order_id, order_number = %cmd.order_number))]
    pub async fn place(&self, cmd: PlaceOrder) -> Result<PlacedOrder, LifecycleError> {
        let mut order = Order::empty(cmd.order_id);
        let events = order.handle(&OrderCommand::PlaceOrder(cmd))?;
        apply_all(&mut order, &events);
        self.orders.save(&order, ExpectedVersion::Exact(0)).await?;
        self.publish_events(events);

        let availability = match self.checker.check(order.lines()).await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(order_id = %order.id_typed(), error = %err, "advisory availability check failed");
                None
            }
        };

        info!(order_id = %order.id_typed(), "order placed");
        Ok(PlacedOrder {
            order,
            availability,
        })
    }

    /// Accept a pending order, consuming its stock.
    ///
    /// Insufficient stock rejects the order instead. A system error leaves it
    /// pending and is returned as retryable.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn accept(&self, order_id: OrderId) -> Result<AcceptOutcome, LifecycleError> {
        let order = self.load(order_id).await?;
        let events = order.handle(&OrderCommand::AcceptOrder(AcceptOrder {
            order_id,
            occurred_at: Utc::now(),
        }))?;

        let mutation = match self.mutator.decrease(order_id, order.lines()).await {
            Ok(mutation) => mutation,
            Err(StockError::InsufficientStock(shortfalls)) => {
                let reason = StockError::InsufficientStock(shortfalls.clone()).to_string();
                let rejected = self
                    .transition(
                        order,
                        OrderCommand::RejectOrder(RejectOrder {
                            order_id,
                            reason,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .await?;
                info!(order_id = %order_id, shortfalls = shortfalls.len(), "order rejected for insufficient stock");
                return Ok(AcceptOutcome::Rejected {
                    order: rejected,
                    shortfalls,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut accepted = order.clone();
        apply_all(&mut accepted, &events);
        match self
            .orders
            .save(&accepted, ExpectedVersion::Exact(order.version()))
            .await
        {
            Ok(()) => {}
            Err(err) => return Err(self.settle_unsaved_accept(order_id, err).await),
        }

        self.publish_events(events);
        if !mutation.replayed {
            self.publish_alerts(&mutation);
        }
        info!(order_id = %order_id, "order accepted");
        Ok(AcceptOutcome::Accepted {
            order: accepted,
            mutation,
        })
    }

    /// Reject an order; stock consumed by acceptance is given back.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn reject(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<Order, LifecycleError> {
        let order = self.load(order_id).await?;
        let order = self
            .transition(
                order,
                OrderCommand::RejectOrder(RejectOrder {
                    order_id,
                    reason: reason.into(),
                    occurred_at: Utc::now(),
                }),
            )
            .await?;
        self.settle_restock(&order).await?;
        Ok(order)
    }

    /// Cancel an in-house order; stock consumed by acceptance is given back.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<Order, LifecycleError> {
        let order = self.load(order_id).await?;
        let order = self
            .transition(
                order,
                OrderCommand::CancelOrder(CancelOrder {
                    order_id,
                    reason: reason.into(),
                    occurred_at: Utc::now(),
                }),
            )
            .await?;
        self.settle_restock(&order).await?;
        Ok(order)
    }

    pub async fn start_preparing(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.advance(order_id, OrderStatus::Preparing).await
    }

    pub async fn mark_ready(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.advance(order_id, OrderStatus::Ready).await
    }

    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.advance(order_id, OrderStatus::Delivered).await
    }

    /// Give back the stock of a closed order, if it still owes any.
    ///
    /// Safe to call any number of times: the restore is recorded once and
    /// replayed afterwards. Returns `None` when the order is still open or
    /// no decrease was ever recorded for it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn restock(&self, order_id: OrderId) -> Result<Option<StockMutation>, LifecycleError> {
        let order = self.load(order_id).await?;
        self.settle_restock(&order).await
    }

    async fn advance(&self, order_id: OrderId, to: OrderStatus) -> Result<Order, LifecycleError> {
        let order = self.load(order_id).await?;
        self.transition(
            order,
            OrderCommand::AdvanceOrder(AdvanceOrder {
                order_id,
                to,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or(LifecycleError::NotFound(order_id))
    }

    /// Decide, save and publish a transition that has no stock step of its own.
    async fn transition(&self, order: Order, command: OrderCommand) -> Result<Order, LifecycleError> {
        let events = order.handle(&command)?;
        let mut next = order.clone();
        apply_all(&mut next, &events);
        self.orders
            .save(&next, ExpectedVersion::Exact(order.version()))
            .await?;
        self.publish_events(events);
        info!(order_id = %next.id_typed(), status = %next.status(), "order status changed");
        Ok(next)
    }

    async fn settle_restock(&self, order: &Order) -> Result<Option<StockMutation>, LifecycleError> {
        if !order.is_closed() {
            return Ok(None);
        }
        let order_id = order.id_typed();
        let restored = match self.mutator.recorded_decrease(order_id).await {
            Ok(None) => return Ok(None),
            Ok(Some(_)) => self.mutator.restore(order_id, order.lines()).await,
            Err(err) => Err(err),
        };
        match restored {
            Ok(mutation) => Ok(Some(mutation)),
            Err(source) => {
                warn!(order_id = %order_id, error = %source, "restock pending after failed restore");
                Err(LifecycleError::RestockPending { order_id, source })
            }
        }
    }

    /// The decrease is recorded but the accepted order could not be saved.
    /// If the order was closed in the meantime nobody else will give the stock
    /// back, so do it here. An order that is still pending keeps the decrease
    /// for a retried `accept` to replay.
    async fn settle_unsaved_accept(&self, order_id: OrderId, err: OrderStoreError) -> LifecycleError {
        let current = match self.load(order_id).await {
            Ok(current) => current,
            Err(reload) => {
                warn!(order_id = %order_id, error = %reload, "could not reload order after failed accept");
                return err.into();
            }
        };
        if !current.is_closed() {
            return err.into();
        }

        warn!(order_id = %order_id, status = %current.status(), "order closed during acceptance; restoring stock");
        match self.settle_restock(&current).await {
            Ok(_) => LifecycleError::Conflict(format!(
                "order was {} while being accepted; stock restored",
                current.status()
            )),
            Err(pending) => pending,
        }
    }

    fn publish_events(&self, events: Vec<OrderEvent>) {
        for event in events {
            self.publish(FulfillmentMessage::Order(event));
        }
    }

    fn publish_alerts(&self, mutation: &StockMutation) {
        for alert in &mutation.alerts {
            self.publish(FulfillmentMessage::LowStock(LowStockRaised {
                order_id: mutation.order_id,
                alert: alert.clone(),
                occurred_at: mutation.recorded_at,
            }));
        }
    }

    // Publication never changes stock state, so a failure is only logged.
    fn publish(&self, message: FulfillmentMessage) {
        if let Err(err) = self.bus.publish(message) {
            warn!(error = ?err, "failed to publish fulfillment message");
        }
    }
}

fn apply_all(order: &mut Order, events: &[OrderEvent]) {
    for event in events {
        order.apply(event);
    }
}
