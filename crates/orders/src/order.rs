use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesa_core::{Aggregate, AggregateRoot, DomainError, OrderId};
use mesa_events::Event;
use mesa_inventory::OrderLineItem;

use crate::status::{OrderStatus, StockEffect, transition_effect};

/// Where an order came from. Both kinds consume stock the same way; only
/// in-house orders can be cancelled by staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Online,
    InHouse,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Online => "online",
            OrderKind::InHouse => "in_house",
        }
    }
}

impl core::str::FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(OrderKind::Online),
            "in_house" => Ok(OrderKind::InHouse),
            other => Err(format!("unknown order kind '{other}'")),
        }
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_number: String,
    kind: OrderKind,
    status: OrderStatus,
    lines: Vec<OrderLineItem>,
    /// Set once the accepted state is saved; never cleared. Informational: the
    /// stock ledger, not this flag, decides whether a restore is owed.
    stock_consumed: bool,
    status_reason: Option<String>,
    placed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

/// Persisted shape of an order, used by repositories to store and rehydrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub order_number: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub lines: Vec<OrderLineItem>,
    pub stock_consumed: bool,
    pub status_reason: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            kind: OrderKind::Online,
            status: OrderStatus::Pending,
            lines: Vec::new(),
            stock_consumed: false,
            status_reason: None,
            placed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn from_snapshot(snapshot: OrderSnapshot) -> Self {
        Self {
            id: snapshot.id,
            order_number: snapshot.order_number,
            kind: snapshot.kind,
            status: snapshot.status,
            lines: snapshot.lines,
            stock_consumed: snapshot.stock_consumed,
            status_reason: snapshot.status_reason,
            placed_at: snapshot.placed_at,
            version: snapshot.version,
            created: true,
        }
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            id: self.id,
            order_number: self.order_number.clone(),
            kind: self.kind,
            status: self.status,
            lines: self.lines.clone(),
            stock_consumed: self.stock_consumed,
            status_reason: self.status_reason.clone(),
            placed_at: self.placed_at,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLineItem] {
        &self.lines
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn stock_consumed(&self) -> bool {
        self.stock_consumed
    }

    /// Rejected or cancelled. A closed order keeps no stock.
    pub fn is_closed(&self) -> bool {
        matches!(self.status, OrderStatus::Rejected | OrderStatus::Cancelled)
    }

    /// Stock effect of moving to `target`, or an invariant violation if the
    /// move is not allowed from the current status.
    pub fn stock_effect(&self, target: OrderStatus) -> Result<StockEffect, DomainError> {
        transition_effect(self.kind, self.status, target).ok_or_else(|| {
            DomainError::invariant(format!(
                "cannot move {} order {} from {} to {}",
                self.kind.as_str(),
                self.order_number,
                self.status,
                target
            ))
        })
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub kind: OrderKind,
    pub lines: Vec<OrderLineItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceOrder (kitchen progress: preparing, ready, delivered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceOrder {
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AcceptOrder(AcceptOrder),
    AdvanceOrder(AdvanceOrder),
    RejectOrder(RejectOrder),
    CancelOrder(CancelOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub kind: OrderKind,
    pub lines: Vec<OrderLineItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderAccepted (stock has been decreased).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAdvanced {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled (in-house orders only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderAccepted(OrderAccepted),
    OrderAdvanced(OrderAdvanced),
    OrderRejected(OrderRejected),
    OrderCancelled(OrderCancelled),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::OrderAccepted(e) => e.order_id,
            OrderEvent::OrderAdvanced(e) => e.order_id,
            OrderEvent::OrderRejected(e) => e.order_id,
            OrderEvent::OrderCancelled(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderAccepted(_) => "orders.order.accepted",
            OrderEvent::OrderAdvanced(_) => "orders.order.advanced",
            OrderEvent::OrderRejected(_) => "orders.order.rejected",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderAccepted(e) => e.occurred_at,
            OrderEvent::OrderAdvanced(e) => e.occurred_at,
            OrderEvent::OrderRejected(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.kind = e.kind;
                self.lines = e.lines.clone();
                self.status = OrderStatus::Pending;
                self.stock_consumed = false;
                self.status_reason = None;
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderAccepted(_) => {
                self.status = OrderStatus::Accepted;
                self.stock_consumed = true;
            }
            OrderEvent::OrderAdvanced(e) => {
                self.status = e.to;
            }
            OrderEvent::OrderRejected(e) => {
                self.status = OrderStatus::Rejected;
                self.status_reason = Some(e.reason.clone());
            }
            OrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.status_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AcceptOrder(cmd) => self.handle_accept(cmd),
            OrderCommand::AdvanceOrder(cmd) => self.handle_advance(cmd),
            OrderCommand::RejectOrder(cmd) => self.handle_reject(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_placed(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order_number cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot place an order without lines"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.trim().to_string(),
            kind: cmd.kind,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        self.stock_effect(OrderStatus::Accepted)?;

        Ok(vec![OrderEvent::OrderAccepted(OrderAccepted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance(&self, cmd: &AdvanceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        if !matches!(
            cmd.to,
            OrderStatus::Preparing | OrderStatus::Ready | OrderStatus::Delivered
        ) {
            return Err(DomainError::validation(format!(
                "advance only moves to preparing, ready or delivered (got {})",
                cmd.to
            )));
        }
        self.stock_effect(cmd.to)?;

        Ok(vec![OrderEvent::OrderAdvanced(OrderAdvanced {
            order_id: cmd.order_id,
            from: self.status,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        let reason = required_reason(&cmd.reason)?;
        self.stock_effect(OrderStatus::Rejected)?;

        Ok(vec![OrderEvent::OrderRejected(OrderRejected {
            order_id: cmd.order_id,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        let reason = required_reason(&cmd.reason)?;
        self.stock_effect(OrderStatus::Cancelled)?;

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn required_reason(reason: &str) -> Result<String, DomainError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("reason cannot be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesa_core::ProductId;

    fn test_order_id() -> OrderId {
        OrderId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_lines() -> Vec<OrderLineItem> {
        vec![
            OrderLineItem::new(ProductId::new(), 3, 450).unwrap(),
            OrderLineItem::new(ProductId::new(), 2, 300).unwrap(),
        ]
    }

    fn execute(order: &mut Order, command: OrderCommand) -> Vec<OrderEvent> {
        let events = order.handle(&command).unwrap();
        for e in &events {
            order.apply(e);
        }
        events
    }

    fn placed(kind: OrderKind) -> Order {
        let order_id = test_order_id();
        let mut order = Order::empty(order_id);
        execute(
            &mut order,
            OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                order_number: "A-1001".into(),
                kind,
                lines: test_lines(),
                occurred_at: test_time(),
            }),
        );
        order
    }

    fn accept(order: &mut Order) {
        let order_id = order.id_typed();
        execute(
            order,
            OrderCommand::AcceptOrder(AcceptOrder {
                order_id,
                occurred_at: test_time(),
            }),
        );
    }

    fn advance(order: &mut Order, to: OrderStatus) {
        let order_id = order.id_typed();
        execute(
            order,
            OrderCommand::AdvanceOrder(AdvanceOrder {
                order_id,
                to,
                occurred_at: test_time(),
            }),
        );
    }

    #[test]
    fn place_order_starts_pending() {
        let order = placed(OrderKind::Online);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.lines().len(), 2);
        assert_eq!(order.version(), 1);
        assert!(!order.stock_consumed());
    }

    #[test]
    fn cannot_place_order_without_lines() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                order_number: "A-1".into(),
                kind: OrderKind::Online,
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn accepting_marks_stock_consumed() {
        let mut order = placed(OrderKind::Online);
        assert_eq!(order.stock_effect(OrderStatus::Accepted).unwrap(), StockEffect::Decrease);

        accept(&mut order);

        assert_eq!(order.status(), OrderStatus::Accepted);
        assert!(order.stock_consumed());
    }

    #[test]
    fn full_lifecycle_pending_to_delivered() {
        let mut order = placed(OrderKind::InHouse);
        accept(&mut order);
        advance(&mut order, OrderStatus::Preparing);
        advance(&mut order, OrderStatus::Ready);
        advance(&mut order, OrderStatus::Delivered);

        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.version(), 5);
        assert!(order.stock_consumed());
        assert!(!order.is_closed());
    }

    #[test]
    fn rejecting_pending_order_needs_no_restock() {
        let mut order = placed(OrderKind::Online);
        let order_id = order.id_typed();
        assert_eq!(order.stock_effect(OrderStatus::Rejected).unwrap(), StockEffect::None);

        let events = execute(
            &mut order,
            OrderCommand::RejectOrder(RejectOrder {
                order_id,
                reason: "kitchen closed".into(),
                occurred_at: test_time(),
            }),
        );

        assert!(matches!(events[0], OrderEvent::OrderRejected(_)));
        assert_eq!(order.status(), OrderStatus::Rejected);
        assert_eq!(order.status_reason(), Some("kitchen closed"));
        assert!(order.is_closed());
        assert!(!order.stock_consumed());
    }

    #[test]
    fn rejecting_preparing_order_requires_restock() {
        let mut order = placed(OrderKind::Online);
        accept(&mut order);
        advance(&mut order, OrderStatus::Preparing);
        let order_id = order.id_typed();
        assert_eq!(order.stock_effect(OrderStatus::Rejected).unwrap(), StockEffect::Restore);

        execute(
            &mut order,
            OrderCommand::RejectOrder(RejectOrder {
                order_id,
                reason: "customer unreachable".into(),
                occurred_at: test_time(),
            }),
        );

        assert!(order.is_closed());
        assert!(order.stock_consumed());
    }

    #[test]
    fn online_orders_cannot_be_cancelled() {
        let mut order = placed(OrderKind::Online);
        accept(&mut order);
        let order_id = order.id_typed();

        let err = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id,
                reason: "changed mind".into(),
                occurred_at: test_time(),
            }))
            .unwrap_err();

        match err {
            DomainError::InvariantViolation(msg) if msg.contains("from accepted to cancelled") => {}
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn in_house_cancel_after_accept_requires_restock() {
        let mut order = placed(OrderKind::InHouse);
        accept(&mut order);
        let order_id = order.id_typed();
        assert_eq!(order.stock_effect(OrderStatus::Cancelled).unwrap(), StockEffect::Restore);

        execute(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                reason: "table left".into(),
                occurred_at: test_time(),
            }),
        );

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(order.is_closed());
    }

    #[test]
    fn cannot_accept_twice() {
        let mut order = placed(OrderKind::Online);
        accept(&mut order);
        let order_id = order.id_typed();

        let err = order
            .handle(&OrderCommand::AcceptOrder(AcceptOrder {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn advance_cannot_skip_acceptance() {
        let order = placed(OrderKind::Online);
        let err = order
            .handle(&OrderCommand::AdvanceOrder(AdvanceOrder {
                order_id: order.id_typed(),
                to: OrderStatus::Preparing,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn blank_reason_is_rejected() {
        let order = placed(OrderKind::Online);
        let err = order
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                order_id: order.id_typed(),
                reason: "   ".into(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_on_unplaced_order_are_not_found() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::AcceptOrder(AcceptOrder {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = placed(OrderKind::Online);
        let before = order.clone();

        let cmd = OrderCommand::AcceptOrder(AcceptOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        });
        let events1 = order.handle(&cmd).unwrap();
        let events2 = order.handle(&cmd).unwrap();

        assert_eq!(order, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let mut order = placed(OrderKind::InHouse);
        accept(&mut order);

        let restored = Order::from_snapshot(order.snapshot());

        assert_eq!(restored, order);
    }
}
