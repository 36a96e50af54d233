//! In-memory Movement Ledger.
//!
//! Append-only: entries are assigned an id, a ledger sequence and a timestamp on
//! append and are never touched again. Per-pair and per-document indexes plus a
//! running per-pair sum keep the audit queries cheap.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use stockledger_core::{ItemVariantId, LocationId, MovementId, UserId};
use stockledger_inventory::{DocumentRef, Movement, MovementKind, StockKey};

/// A movement resolved by the engine but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
    pub kind: MovementKind,
    pub signed_quantity: i64,
    pub unit_cost: Decimal,
    pub document: DocumentRef,
    pub acting_user_id: UserId,
    pub reason: Option<String>,
    pub allow_negative: bool,
}

impl NewMovement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_variant_id, self.location_id)
    }

    pub fn into_movement(
        self,
        id: MovementId,
        sequence: u64,
        occurred_at: DateTime<Utc>,
    ) -> Movement {
        Movement {
            id,
            sequence,
            item_variant_id: self.item_variant_id,
            location_id: self.location_id,
            kind: self.kind,
            signed_quantity: self.signed_quantity,
            unit_cost: self.unit_cost,
            document: self.document,
            acting_user_id: self.acting_user_id,
            occurred_at,
            reason: self.reason,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<Movement>,
    by_key: HashMap<StockKey, Vec<usize>>,
    by_document: HashMap<DocumentRef, Vec<usize>>,
    sums: HashMap<StockKey, i64>,
}

#[derive(Debug, Default)]
pub struct MovementLedger {
    state: RwLock<LedgerState>,
}

impl MovementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `movements` in order and return them as written.
    ///
    /// All entries of one call share a timestamp and occupy consecutive sequence
    /// numbers.
    pub fn append(&self, movements: Vec<NewMovement>) -> Vec<Movement> {
        let mut state = self.state.write();
        let occurred_at = Utc::now();
        let mut written = Vec::with_capacity(movements.len());

        for new in movements {
            let index = state.entries.len();
            let movement = new.into_movement(MovementId::new(), index as u64 + 1, occurred_at);
            let key = movement.key();

            state.by_key.entry(key).or_default().push(index);
            if movement.document != DocumentRef::Manual {
                state.by_document.entry(movement.document).or_default().push(index);
            }
            *state.sums.entry(key).or_insert(0) += movement.signed_quantity;
            state.entries.push(movement.clone());
            written.push(movement);
        }
        written
    }

    /// Up to `limit` movements of one pair, newest first.
    pub fn list_by_item_location(&self, key: StockKey, limit: usize) -> Vec<Movement> {
        let state = self.state.read();
        state
            .by_key
            .get(&key)
            .map(|indexes| {
                indexes
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|&i| state.entries[i].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every movement caused by `document`, in ledger order. Manual movements
    /// carry no document and are not indexed.
    pub fn list_by_document(&self, document: DocumentRef) -> Vec<Movement> {
        let state = self.state.read();
        state
            .by_document
            .get(&document)
            .map(|indexes| indexes.iter().map(|&i| state.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn sum_by_item_location(&self, key: StockKey) -> i64 {
        self.state.read().sums.get(&key).copied().unwrap_or(0)
    }

    pub fn sums(&self) -> BTreeMap<StockKey, i64> {
        self.state
            .read()
            .sums
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
