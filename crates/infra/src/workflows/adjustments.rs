//! Manual stock operations: opening balances, losses, breakage and corrections
//! entered outside any document.
//!
//! Manual batches carry [`DocumentRef::Manual`] and an operation key chosen by
//! the caller; resubmitting the same operation key replays the first outcome.

use std::sync::Arc;

use tracing::warn;

use stockledger_core::UserId;
use stockledger_events::{EventBus, StockAlert};
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, MovementBatch, MovementKind, MovementRequest,
    ReconciliationResult, StockKey,
};

use crate::reconciliation::{BatchReceipt, ReconciliationEngine};
use crate::stock_store::StockStore;

/// One documented manual movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualMovement {
    pub key: StockKey,
    pub kind: MovementKind,
    pub magnitude: u64,
    pub reason: String,
    pub allow_negative: bool,
}

impl ManualMovement {
    pub fn new(
        key: StockKey,
        kind: MovementKind,
        magnitude: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            key,
            kind,
            magnitude,
            reason: reason.into(),
            allow_negative: false,
        }
    }

    /// Corrective adjustment permitted to take the pair below zero.
    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }
}

pub struct StockAdjustments<S, B> {
    engine: Arc<ReconciliationEngine<S, B>>,
}

impl<S, B> StockAdjustments<S, B> {
    pub fn new(engine: Arc<ReconciliationEngine<S, B>>) -> Self {
        Self { engine }
    }
}

impl<S, B> StockAdjustments<S, B>
where
    S: StockStore,
    B: EventBus<StockAlert>,
{
    /// Bring `key` to `new_quantity` with one Adjustment for the difference.
    ///
    /// The difference is taken against the quantity under the row lock; nothing
    /// is appended when the pair already holds `new_quantity`.
    pub fn adjust_to(
        &self,
        operation: impl Into<String>,
        key: StockKey,
        new_quantity: u64,
        acting_user_id: UserId,
        reason: impl Into<String>,
    ) -> ReconciliationResult<BatchReceipt> {
        let request = MovementRequest::reconcile_to(
            key.item_variant_id,
            key.location_id,
            new_quantity,
            DocumentRef::Manual,
            acting_user_id,
        )
        .with_unit_cost(self.engine.policies().valuation_cost(key))
        .with_reason(reason);

        self.submit(MovementBatch::new(
            IdempotencyKey::new(DocumentRef::Manual, operation),
            vec![request],
        ))
    }

    /// Record an InitialStock, Loss, Breakage or Adjustment movement.
    pub fn record(
        &self,
        operation: impl Into<String>,
        movement: ManualMovement,
        acting_user_id: UserId,
    ) -> ReconciliationResult<BatchReceipt> {
        let mut request = MovementRequest::movement(
            movement.key.item_variant_id,
            movement.key.location_id,
            movement.kind,
            movement.magnitude,
            DocumentRef::Manual,
            acting_user_id,
        )
        .with_unit_cost(self.engine.policies().valuation_cost(movement.key))
        .with_reason(movement.reason);
        if movement.allow_negative {
            request = request.allowing_negative();
        }

        self.submit(MovementBatch::new(
            IdempotencyKey::new(DocumentRef::Manual, operation),
            vec![request],
        ))
    }

    fn submit(&self, batch: MovementBatch) -> ReconciliationResult<BatchReceipt> {
        let retries = self.engine.config().lock_retries;
        let mut attempt = 0;
        loop {
            match self.engine.apply_batch(&batch) {
                Err(err) if err.is_retryable() && attempt < retries => {
                    attempt += 1;
                    warn!(attempt, key = %batch.key, "retrying manual movement after lock timeout");
                }
                outcome => return outcome,
            }
        }
    }
}
