//! Storage boundary for the Quantity Store and the Movement Ledger.
//!
//! Both are mutated together, under per-pair row locks, and only through
//! [`StockStore::commit`]. The reconciliation engine owns the decision of what to
//! write (`plan`); the store owns locking, atomic application and durability of
//! the idempotency record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, MovementId};
use stockledger_inventory::{
    IdempotencyKey, Movement, MovementBatch, MovementRequest, ReconciliationResult, StockKey,
    StockLevel,
};

use crate::ledger::{MovementLedger, NewMovement};
use crate::quantity_store::QuantityStore;

/// The stored outcome of a committed batch, keyed by its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedBatch {
    pub key: IdempotencyKey,
    pub requests: Vec<MovementRequest>,
    pub movement_ids: Vec<MovementId>,
}

impl RecordedBatch {
    /// Whether `requests` would have the same stock effect as the recorded batch.
    ///
    /// Unit cost, reason and acting user are not part of the effect: a retry by a
    /// different user, or after a cost update, still replays.
    pub fn same_effect(&self, requests: &[MovementRequest]) -> bool {
        self.requests.len() == requests.len()
            && self.requests.iter().zip(requests).all(|(a, b)| {
                a.item_variant_id == b.item_variant_id
                    && a.location_id == b.location_id
                    && a.change == b.change
                    && a.allow_negative == b.allow_negative
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Vec<Movement>),
    /// Another caller committed under the same key while this one waited.
    AlreadyRecorded(RecordedBatch),
}

/// Decides the movements of a batch given the locked quantities of its pairs.
pub type Planner<'a> =
    dyn FnMut(&BTreeMap<StockKey, i64>) -> ReconciliationResult<Vec<NewMovement>> + 'a;

pub trait StockStore: Send + Sync {
    fn get_quantity(&self, key: StockKey) -> ReconciliationResult<i64>;

    fn stock_level(&self, key: StockKey) -> ReconciliationResult<Option<StockLevel>>;

    fn list_by_location(&self, location_id: LocationId) -> ReconciliationResult<Vec<StockLevel>>;

    fn list_levels(&self) -> ReconciliationResult<Vec<StockLevel>>;

    /// Newest first.
    fn list_by_item_location(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>>;

    fn list_by_document(
        &self,
        document: stockledger_inventory::DocumentRef,
    ) -> ReconciliationResult<Vec<Movement>>;

    fn sum_by_item_location(&self, key: StockKey) -> ReconciliationResult<i64>;

    /// Ledger sum of every pair that has at least one movement.
    fn ledger_sums(&self) -> ReconciliationResult<BTreeMap<StockKey, i64>>;

    fn ledger_len(&self) -> ReconciliationResult<u64>;

    fn recorded_batch(&self, key: &IdempotencyKey) -> ReconciliationResult<Option<RecordedBatch>>;

    /// Lock the pairs of `batch`, let `plan` decide the movements, then apply the
    /// deltas, append the movements in order and record the batch, atomically.
    ///
    /// If the key was recorded by a concurrent caller by the time the locks are
    /// held, nothing is written and the recorded batch is returned instead.
    fn commit(
        &self,
        batch: &MovementBatch,
        lock_timeout: Duration,
        plan: &mut Planner<'_>,
    ) -> ReconciliationResult<CommitOutcome>;

    /// Overwrite the Quantity Store with the ledger sums. Returns the number of
    /// rows that changed.
    fn rebuild_from_ledger(&self, lock_timeout: Duration) -> ReconciliationResult<usize>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn get_quantity(&self, key: StockKey) -> ReconciliationResult<i64> {
        (**self).get_quantity(key)
    }

    fn stock_level(&self, key: StockKey) -> ReconciliationResult<Option<StockLevel>> {
        (**self).stock_level(key)
    }

    fn list_by_location(&self, location_id: LocationId) -> ReconciliationResult<Vec<StockLevel>> {
        (**self).list_by_location(location_id)
    }

    fn list_levels(&self) -> ReconciliationResult<Vec<StockLevel>> {
        (**self).list_levels()
    }

    fn list_by_item_location(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>> {
        (**self).list_by_item_location(key, limit)
    }

    fn list_by_document(
        &self,
        document: stockledger_inventory::DocumentRef,
    ) -> ReconciliationResult<Vec<Movement>> {
        (**self).list_by_document(document)
    }

    fn sum_by_item_location(&self, key: StockKey) -> ReconciliationResult<i64> {
        (**self).sum_by_item_location(key)
    }

    fn ledger_sums(&self) -> ReconciliationResult<BTreeMap<StockKey, i64>> {
        (**self).ledger_sums()
    }

    fn ledger_len(&self) -> ReconciliationResult<u64> {
        (**self).ledger_len()
    }

    fn recorded_batch(&self, key: &IdempotencyKey) -> ReconciliationResult<Option<RecordedBatch>> {
        (**self).recorded_batch(key)
    }

    fn commit(
        &self,
        batch: &MovementBatch,
        lock_timeout: Duration,
        plan: &mut Planner<'_>,
    ) -> ReconciliationResult<CommitOutcome> {
        (**self).commit(batch, lock_timeout, plan)
    }

    fn rebuild_from_ledger(&self, lock_timeout: Duration) -> ReconciliationResult<usize> {
        (**self).rebuild_from_ledger(lock_timeout)
    }
}

/// Quantity Store + Movement Ledger held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    quantities: QuantityStore,
    ledger: MovementLedger,
    batches: Mutex<HashMap<IdempotencyKey, RecordedBatch>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StockStore for InMemoryStockStore {
    fn get_quantity(&self, key: StockKey) -> ReconciliationResult<i64> {
        Ok(self.quantities.get_quantity(key))
    }

    fn stock_level(&self, key: StockKey) -> ReconciliationResult<Option<StockLevel>> {
        Ok(self.quantities.stock_level(key))
    }

    fn list_by_location(&self, location_id: LocationId) -> ReconciliationResult<Vec<StockLevel>> {
        Ok(self.quantities.list_by_location(location_id))
    }

    fn list_levels(&self) -> ReconciliationResult<Vec<StockLevel>> {
        Ok(self.quantities.list_levels())
    }

    fn list_by_item_location(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>> {
        Ok(self.ledger.list_by_item_location(key, limit))
    }

    fn list_by_document(
        &self,
        document: stockledger_inventory::DocumentRef,
    ) -> ReconciliationResult<Vec<Movement>> {
        Ok(self.ledger.list_by_document(document))
    }

    fn sum_by_item_location(&self, key: StockKey) -> ReconciliationResult<i64> {
        Ok(self.ledger.sum_by_item_location(key))
    }

    fn ledger_sums(&self) -> ReconciliationResult<BTreeMap<StockKey, i64>> {
        Ok(self.ledger.sums())
    }

    fn ledger_len(&self) -> ReconciliationResult<u64> {
        Ok(self.ledger.len() as u64)
    }

    fn recorded_batch(&self, key: &IdempotencyKey) -> ReconciliationResult<Option<RecordedBatch>> {
        Ok(self.batches.lock().get(key).cloned())
    }

    fn commit(
        &self,
        batch: &MovementBatch,
        lock_timeout: Duration,
        plan: &mut Planner<'_>,
    ) -> ReconciliationResult<CommitOutcome> {
        let keys: Vec<StockKey> = batch.requests.iter().map(MovementRequest::key).collect();

        self.quantities.with_locked_rows(&keys, lock_timeout, |rows| {
            if let Some(recorded) = self.batches.lock().get(&batch.key).cloned() {
                return Ok(CommitOutcome::AlreadyRecorded(recorded));
            }

            let current: BTreeMap<StockKey, i64> = rows.current().collect();
            let planned = plan(&current)?;
            for movement in &planned {
                rows.apply_delta(
                    movement.key(),
                    movement.signed_quantity,
                    movement.allow_negative,
                )?;
            }

            // Nothing below can fail: the ledger append and the staged write-back
            // happen while every row is still held.
            let written = self.ledger.append(planned);
            self.batches.lock().insert(
                batch.key.clone(),
                RecordedBatch {
                    key: batch.key.clone(),
                    requests: batch.requests.clone(),
                    movement_ids: written.iter().map(|m| m.id).collect(),
                },
            );
            Ok(CommitOutcome::Committed(written))
        })
    }

    fn rebuild_from_ledger(&self, lock_timeout: Duration) -> ReconciliationResult<usize> {
        let sums: HashMap<StockKey, i64> = self.ledger.sums().into_iter().collect();
        self.quantities.replace_all(&sums, lock_timeout)
    }
}
