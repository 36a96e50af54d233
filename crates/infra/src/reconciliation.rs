//! Reconciliation engine: the only path by which stock changes.
//!
//! ```text
//! MovementBatch
//!   ↓
//! 1. Validate kinds, signs and document references (no locks held)
//!   ↓
//! 2. Idempotency: a recorded key replays its original movement ids
//!   ↓
//! 3. Document gate: the transition must still be open on the document
//!   ↓
//! 4. Lock every (item, location) row in key order, bounded wait
//!   ↓
//! 5. Plan against the locked quantities: resolve deltas, reject shortages
//!   ↓
//! 6. Apply deltas, append movements in line order, record the key
//!   ↓
//! 7. Publish stock alerts for the touched pairs (after commit)
//! ```
//!
//! Any failure before step 7 leaves quantities and ledger untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use stockledger_core::{LocationId, MovementId};
use stockledger_events::{EventBus, InMemoryEventBus, StockAlert, Subscription};
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, Movement, MovementBatch, ReconciliationError,
    ReconciliationResult, StockKey, StockLevel, StockShortage,
};

use crate::config::LedgerConfig;
use crate::document_gate::DocumentGate;
use crate::ledger::NewMovement;
use crate::policy::ItemPolicyStore;
use crate::stock_store::{CommitOutcome, InMemoryStockStore, RecordedBatch, StockStore};

/// Result of a successful `apply_batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub key: IdempotencyKey,
    /// Ids of the appended movements, in line order.
    pub movement_ids: Vec<MovementId>,
    /// True when the key had already been committed and nothing was applied.
    pub replayed: bool,
}

/// Post-commit state of one pair touched by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairChange {
    pub quantity: i64,
    pub delta: i64,
}

/// A pair whose stored quantity disagrees with its ledger sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inconsistency {
    pub key: StockKey,
    pub stored: i64,
    pub ledger: i64,
}

/// Decide the movements of `batch` against the locked `current` quantities.
///
/// Requests are resolved in line order against a running quantity per pair, so
/// a later line sees the effect of earlier lines on the same pair. Every line
/// that would drive its pair negative without `allow_negative` is reported.
pub fn plan_batch(
    batch: &MovementBatch,
    current: &BTreeMap<StockKey, i64>,
) -> ReconciliationResult<(Vec<NewMovement>, BTreeMap<StockKey, PairChange>)> {
    let mut running = current.clone();
    let mut changes: BTreeMap<StockKey, PairChange> = BTreeMap::new();
    let mut planned = Vec::with_capacity(batch.requests.len());
    let mut shortages = Vec::new();

    for request in &batch.requests {
        let key = request.key();
        let available = running.get(&key).copied().unwrap_or(0);
        let Some((kind, delta)) = request.resolve(available)? else {
            continue;
        };

        let next = available
            .checked_add(delta)
            .ok_or_else(|| ReconciliationError::storage(format!("quantity overflow on {key}")))?;
        if next < 0 && delta < 0 && !request.allow_negative {
            shortages.push(StockShortage {
                key,
                requested: delta.unsigned_abs(),
                available,
            });
            continue;
        }

        running.insert(key, next);
        let change = changes.entry(key).or_insert(PairChange {
            quantity: available,
            delta: 0,
        });
        change.quantity = next;
        change.delta += delta;

        planned.push(NewMovement {
            item_variant_id: request.item_variant_id,
            location_id: request.location_id,
            kind,
            signed_quantity: delta,
            unit_cost: request.unit_cost,
            document: request.document,
            acting_user_id: request.acting_user_id,
            reason: request.reason.clone(),
            allow_negative: request.allow_negative,
        });
    }

    if !shortages.is_empty() {
        return Err(ReconciliationError::InsufficientStock { shortages });
    }
    Ok((planned, changes))
}

/// Keys of batches currently between their idempotency check and their commit.
#[derive(Debug, Default)]
struct InFlight {
    keys: Mutex<HashSet<IdempotencyKey>>,
}

struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: IdempotencyKey,
}

impl InFlight {
    fn enter(&self, batch: &MovementBatch) -> ReconciliationResult<Option<InFlightGuard<'_>>> {
        let Some(first) = batch.requests.first() else {
            return Ok(None);
        };
        if !self.keys.lock().insert(batch.key.clone()) {
            return Err(ReconciliationError::LockTimeout {
                key: first.key(),
                waited_ms: 0,
            });
        }
        Ok(Some(InFlightGuard {
            in_flight: self,
            key: batch.key.clone(),
        }))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.keys.lock().remove(&self.key);
    }
}

pub struct ReconciliationEngine<S = InMemoryStockStore, B = InMemoryEventBus<StockAlert>> {
    store: S,
    alerts: B,
    policies: Arc<ItemPolicyStore>,
    gate: Option<Arc<dyn DocumentGate>>,
    in_flight: InFlight,
    config: LedgerConfig,
}

impl ReconciliationEngine {
    /// Engine over in-memory storage with default configuration.
    pub fn in_memory() -> Self {
        Self::new(
            InMemoryStockStore::new(),
            InMemoryEventBus::new(),
            LedgerConfig::default(),
        )
    }
}

impl<S, B> ReconciliationEngine<S, B> {
    pub fn new(store: S, alerts: B, config: LedgerConfig) -> Self {
        Self {
            store,
            alerts,
            policies: Arc::new(ItemPolicyStore::new()),
            gate: None,
            in_flight: InFlight::default(),
            config,
        }
    }

    pub fn with_policies(mut self, policies: Arc<ItemPolicyStore>) -> Self {
        self.policies = policies;
        self
    }

    /// Refuse batches whose transition `gate` does not currently permit.
    pub fn with_gate(mut self, gate: Arc<dyn DocumentGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn policies(&self) -> &Arc<ItemPolicyStore> {
        &self.policies
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> ReconciliationEngine<S, B>
where
    S: StockStore,
    B: EventBus<StockAlert>,
{
    /// Apply `batch` atomically: all of its movements or none of them.
    #[instrument(skip(self, batch), fields(key = %batch.key, lines = batch.requests.len()))]
    pub fn apply_batch(&self, batch: &MovementBatch) -> ReconciliationResult<BatchReceipt> {
        batch.validate().inspect_err(|e| warn!(error = %e, "rejected malformed batch"))?;

        if let Some(recorded) = self.store.recorded_batch(&batch.key)? {
            return self.replay(batch, recorded);
        }

        if self.gate.as_ref().is_some_and(|gate| !gate.permits(&batch.key)) {
            warn!("document does not permit this transition");
            return Err(ReconciliationError::conflict(format!(
                "{} does not permit '{}' in its current state",
                batch.key.document, batch.key.transition
            )));
        }

        let _guard = self.in_flight.enter(batch).inspect_err(|_| {
            warn!("another call is applying the same idempotency key");
        })?;

        let mut changes = BTreeMap::new();
        let outcome = self
            .store
            .commit(batch, self.config.lock_timeout(), &mut |current| {
                let (planned, touched) = plan_batch(batch, current)?;
                changes = touched;
                Ok(planned)
            })
            .inspect_err(|e| match e {
                ReconciliationError::LockTimeout { key, waited_ms } => {
                    warn!(%key, waited_ms, "row lock wait expired");
                }
                other => warn!(error = %other, "batch rejected"),
            })?;

        match outcome {
            CommitOutcome::Committed(movements) => {
                info!(movements = movements.len(), "batch committed");
                self.raise_alerts(&changes);
                Ok(BatchReceipt {
                    key: batch.key.clone(),
                    movement_ids: movements.iter().map(|m| m.id).collect(),
                    replayed: false,
                })
            }
            CommitOutcome::AlreadyRecorded(recorded) => self.replay(batch, recorded),
        }
    }

    fn replay(
        &self,
        batch: &MovementBatch,
        recorded: RecordedBatch,
    ) -> ReconciliationResult<BatchReceipt> {
        if !recorded.same_effect(&batch.requests) {
            warn!("idempotency key reused with different content");
            return Err(ReconciliationError::conflict(format!(
                "{} was already applied with different movements",
                batch.key
            )));
        }
        debug!(movements = recorded.movement_ids.len(), "idempotent replay");
        Ok(BatchReceipt {
            key: recorded.key,
            movement_ids: recorded.movement_ids,
            replayed: true,
        })
    }

    fn raise_alerts(&self, changes: &BTreeMap<StockKey, PairChange>) {
        if !self.config.alerts_enabled {
            return;
        }
        let now = Utc::now();
        for (key, change) in changes {
            let Some(alert) = StockAlert::evaluate(
                key.item_variant_id,
                key.location_id,
                change.quantity,
                change.delta,
                self.policies.threshold(*key),
                now,
            ) else {
                continue;
            };
            // The batch is committed; a lost alert is logged, not surfaced.
            if let Err(e) = self.alerts.publish(alert) {
                warn!(%key, error = ?e, "stock alert publication failed");
            }
        }
    }

    pub fn subscribe_alerts(&self) -> Subscription<StockAlert> {
        self.alerts.subscribe()
    }

    pub fn get_quantity(&self, key: StockKey) -> ReconciliationResult<i64> {
        self.store.get_quantity(key)
    }

    pub fn stock_level(&self, key: StockKey) -> ReconciliationResult<Option<StockLevel>> {
        self.store.stock_level(key)
    }

    pub fn list_by_location(
        &self,
        location_id: LocationId,
    ) -> ReconciliationResult<Vec<StockLevel>> {
        self.store.list_by_location(location_id)
    }

    /// Newest first, capped at the configured history limit.
    pub fn list_by_item_location(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>> {
        self.store
            .list_by_item_location(key, limit.min(self.config.history_limit))
    }

    pub fn list_by_document(&self, document: DocumentRef) -> ReconciliationResult<Vec<Movement>> {
        self.store.list_by_document(document)
    }

    pub fn sum_by_item_location(&self, key: StockKey) -> ReconciliationResult<i64> {
        self.store.sum_by_item_location(key)
    }

    pub fn ledger_len(&self) -> ReconciliationResult<u64> {
        self.store.ledger_len()
    }

    /// Every pair whose stored quantity differs from the sum of its movements.
    #[instrument(skip(self))]
    pub fn verify_consistency(&self) -> ReconciliationResult<Vec<Inconsistency>> {
        let sums = self.store.ledger_sums()?;
        let mut mismatches = Vec::new();

        for level in self.store.list_levels()? {
            let ledger = sums.get(&level.key).copied().unwrap_or(0);
            if ledger != level.quantity_on_hand {
                mismatches.push(Inconsistency {
                    key: level.key,
                    stored: level.quantity_on_hand,
                    ledger,
                });
            }
        }
        for (key, ledger) in &sums {
            if self.store.stock_level(*key)?.is_none() && *ledger != 0 {
                mismatches.push(Inconsistency {
                    key: *key,
                    stored: 0,
                    ledger: *ledger,
                });
            }
        }

        if !mismatches.is_empty() {
            warn!(pairs = mismatches.len(), "quantity store disagrees with ledger");
        }
        Ok(mismatches)
    }

    /// Replay the ledger into the Quantity Store. Returns the rows corrected.
    #[instrument(skip(self))]
    pub fn rebuild_from_ledger(&self) -> ReconciliationResult<usize> {
        let corrected = self.store.rebuild_from_ledger(self.config.lock_timeout())?;
        info!(corrected, "quantity store rebuilt from ledger");
        Ok(corrected)
    }
}
