//! Append-only document event store boundary.
//!
//! Every document (sale, purchase, transfer, count) is persisted as its own
//! stream of events; the store makes no storage assumptions beyond that.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
