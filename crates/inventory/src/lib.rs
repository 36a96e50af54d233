//! Inventory movement vocabulary.
//!
//! This crate defines what a stock movement *is*: the closed set of movement
//! kinds and their sign convention, the document a movement references, the
//! request shape submitted to the reconciliation engine, and the engine's error
//! taxonomy. It is pure (no IO, no storage); the engine itself lives in infra.

pub mod batch;
pub mod error;
pub mod movement;
pub mod stock;

pub use batch::{IdempotencyKey, MovementBatch, StockDocument};
pub use error::{ReconciliationError, ReconciliationResult, StockShortage};
pub use movement::{
    Direction, DocumentRef, Movement, MovementKind, MovementRequest, StockChange,
};
pub use stock::{StockKey, StockLevel};
