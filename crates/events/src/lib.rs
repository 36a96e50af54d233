//! Events: the `Event` trait, stream envelopes, the pub/sub bus and the stock
//! alert events emitted by the reconciliation engine.

pub mod alerts;
pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use alerts::{StockAlert, StockBelowThreshold, StockDepleted};
pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
