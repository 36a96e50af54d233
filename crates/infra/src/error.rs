//! Errors surfaced by document workflow transitions.

use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::ReconciliationError;

use crate::event_store::EventStoreError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// A transition failed and the document status is unchanged.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The command was refused by the document itself (bad input, invariant).
    #[error(transparent)]
    Domain(DomainError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// Stored document events could not be read back into the document type.
    #[error("failed to decode document history: {0}")]
    Deserialize(String),
}

impl WorkflowError {
    /// `LockTimeout`: retry the whole transition with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Reconciliation(e) if e.is_retryable())
    }

    /// The document was not in a state permitting the transition; reload and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WorkflowError::Reconciliation(ReconciliationError::DocumentReferenceConflict(_))
                | WorkflowError::EventStore(EventStoreError::Concurrency(_))
        )
    }

    pub fn reconciliation(&self) -> Option<&ReconciliationError> {
        match self {
            WorkflowError::Reconciliation(e) => Some(e),
            _ => None,
        }
    }
}

/// A document refusing a transition because of its status is a stale-state
/// conflict in ledger terms.
impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Conflict(msg) => {
                WorkflowError::Reconciliation(ReconciliationError::DocumentReferenceConflict(msg))
            }
            other => WorkflowError::Domain(other),
        }
    }
}
