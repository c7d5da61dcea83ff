use chrono::{DateTime, Utc};

/// A fact published by the fulfillment core.
///
/// Order status changes (`orders.order.*`) and low-stock alerts
/// (`inventory.stock.low`, `inventory.stock.out`) are events. They are only
/// published after the change they describe has been saved, so a subscriber
/// never hears about a transition or a decrease that was rolled back.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<crate>.<subject>.<what happened>`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bumped when a field changes meaning.
    fn version(&self) -> u32;

    /// When it happened in the restaurant, not when it was delivered.
    fn occurred_at(&self) -> DateTime<Utc>;
}
