//! Reconciliation error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stock::StockKey;

pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

/// One line of a batch that would drive its pair negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub key: StockKey,
    /// Units the failing line takes out of the pair.
    pub requested: u64,
    /// Units on hand when that line is reached, after earlier lines of the
    /// same batch.
    pub available: i64,
}

impl core::fmt::Display for StockShortage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: requested {}, available {}",
            self.key, self.requested, self.available
        )
    }
}

/// Why a batch was rejected. A rejected batch applied nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    /// Business rule: one or more pairs would go negative. Never retried
    /// automatically; a person decides whether to reduce quantities or cancel.
    #[error("insufficient stock: {}", format_shortages(.shortages))]
    InsufficientStock { shortages: Vec<StockShortage> },

    /// Sign/kind/document mismatch in a request. Indicates a caller bug.
    #[error("invalid movement: {0}")]
    InvalidMovementKind(String),

    /// The referenced document does not accept this stock transition (stale
    /// state, or an idempotency key reused with different content).
    #[error("document reference conflict: {0}")]
    DocumentReferenceConflict(String),

    /// A row lock could not be obtained within the configured wait. Safe to
    /// retry the whole transition with the same idempotency key.
    #[error("timed out after {waited_ms}ms waiting for {key}")]
    LockTimeout { key: StockKey, waited_ms: u64 },

    /// Backend failure (poisoned lock, database error).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ReconciliationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconciliationError::LockTimeout { .. })
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ReconciliationError::DocumentReferenceConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        ReconciliationError::Storage(msg.into())
    }
}

fn format_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ItemVariantId, LocationId};

    #[test]
    fn insufficient_stock_message_names_item_location_and_quantities() {
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        let err = ReconciliationError::InsufficientStock {
            shortages: vec![StockShortage {
                key,
                requested: 12,
                available: 5,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains(&key.item_variant_id.to_string()));
        assert!(msg.contains(&key.location_id.to_string()));
        assert!(msg.contains("requested 12, available 5"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_lock_timeouts_are_retryable() {
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        assert!(ReconciliationError::LockTimeout { key, waited_ms: 10 }.is_retryable());
        assert!(!ReconciliationError::conflict("stale").is_retryable());
        assert!(!ReconciliationError::storage("db down").is_retryable());
    }
}
