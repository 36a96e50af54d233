//! Batches: the unit of atomicity submitted to the reconciliation engine.

use serde::{Deserialize, Serialize};

use stockledger_core::Aggregate;

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::movement::{DocumentRef, MovementRequest};

/// Identifies one stock-affecting transition of one document.
///
/// Resubmitting a batch under a key that already completed returns the
/// original outcome without touching stock again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub document: DocumentRef,
    pub transition: String,
}

impl IdempotencyKey {
    pub fn new(document: DocumentRef, transition: impl Into<String>) -> Self {
        Self {
            document,
            transition: transition.into(),
        }
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.document, self.transition)
    }
}

/// All movements of one document transition. Applied entirely or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementBatch {
    pub key: IdempotencyKey,
    pub requests: Vec<MovementRequest>,
}

impl MovementBatch {
    pub fn new(key: IdempotencyKey, requests: Vec<MovementRequest>) -> Self {
        Self { key, requests }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Every request must validate and reference the document named by the key.
    pub fn validate(&self) -> ReconciliationResult<()> {
        for request in &self.requests {
            if request.document != self.key.document {
                return Err(ReconciliationError::InvalidMovementKind(format!(
                    "request references {} inside a batch for {}",
                    request.document, self.key.document
                )));
            }
            request.validate()?;
        }
        Ok(())
    }
}

/// A document aggregate whose transitions move stock.
///
/// `stock_batch` is evaluated against the state *before* `events` are applied,
/// which is the state the command was decided against.
pub trait StockDocument: Aggregate {
    fn document_ref(&self) -> DocumentRef;

    /// Stock-affecting transitions the current state permits. The engine
    /// refuses a batch whose transition is not listed here.
    fn open_stock_transitions(&self) -> &'static [&'static str];

    /// The batch `events` require, or `None` when they do not touch stock.
    fn stock_batch(&self, events: &[Self::Event]) -> Option<MovementBatch>;
}
