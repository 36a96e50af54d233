//! Infrastructure layer: stock storage, reconciliation, document persistence and
//! the workflows that connect them.

pub mod config;
pub mod document_gate;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod numbering;
pub mod policy;
pub mod quantity_store;
pub mod reconciliation;
pub mod stock_store;
pub mod workflows;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig};
pub use document_gate::{DocumentGate, DocumentRegistry};
pub use error::{WorkflowError, WorkflowResult};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent};
pub use numbering::{DocumentSequence, LocationDirectory};
pub use policy::{ItemPolicy, ItemPolicyStore};
pub use reconciliation::{BatchReceipt, Inconsistency, PairChange, ReconciliationEngine};
pub use stock_store::{InMemoryStockStore, RecordedBatch, StockStore};
pub use workflows::{InMemoryWorkflows, StockAdjustments, StockWorkflows, Transition};

#[cfg(feature = "postgres")]
pub use postgres::{POSTGRES_SCHEMA, PostgresStockStore};
