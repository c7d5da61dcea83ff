//! Domain events and the pub/sub mechanics used to hand them to external
//! consumers (notification dispatch, dashboards).

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
