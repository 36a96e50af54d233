//! In-memory Quantity Store: one row per (item, location), each behind its own
//! mutex so batches on disjoint pairs never contend.
//!
//! Rows are only written through [`QuantityStore::with_locked_rows`], which the
//! stock store calls on behalf of the reconciliation engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};

use stockledger_core::LocationId;
use stockledger_inventory::{
    ReconciliationError, ReconciliationResult, StockKey, StockLevel, StockShortage,
};

#[derive(Debug, Clone, Copy)]
struct Row {
    quantity: i64,
    last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct QuantityStore {
    rows: RwLock<HashMap<StockKey, Arc<Mutex<Row>>>>,
}

impl QuantityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current on-hand quantity; 0 when the pair has no row yet.
    pub fn get_quantity(&self, key: StockKey) -> i64 {
        self.row(key).map_or(0, |row| row.lock().quantity)
    }

    pub fn stock_level(&self, key: StockKey) -> Option<StockLevel> {
        self.row(key).map(|row| level(key, &row.lock()))
    }

    /// Every row at `location_id`, ordered by item.
    pub fn list_by_location(&self, location_id: LocationId) -> Vec<StockLevel> {
        let mut levels: Vec<StockLevel> = self
            .snapshot_rows()
            .into_iter()
            .filter(|(key, _)| key.location_id == location_id)
            .map(|(key, row)| level(key, &row.lock()))
            .collect();
        levels.sort_by_key(|l| l.key);
        levels
    }

    pub fn list_levels(&self) -> Vec<StockLevel> {
        let mut levels: Vec<StockLevel> = self
            .snapshot_rows()
            .into_iter()
            .map(|(key, row)| level(key, &row.lock()))
            .collect();
        levels.sort_by_key(|l| l.key);
        levels
    }

    /// Lock the rows of `keys` and run `f` against them.
    ///
    /// Rows are created lazily (at quantity 0) and locked in ascending key order,
    /// each with a bounded wait. Deltas applied inside `f` are staged and only
    /// written back when `f` succeeds; on error every row keeps its prior value.
    pub fn with_locked_rows<R>(
        &self,
        keys: &[StockKey],
        timeout: Duration,
        f: impl FnOnce(&mut LockedRows<'_>) -> ReconciliationResult<R>,
    ) -> ReconciliationResult<R> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let handles: Vec<(StockKey, Arc<Mutex<Row>>)> =
            keys.iter().map(|key| (*key, self.row_or_create(*key))).collect();

        let mut guards = Vec::with_capacity(handles.len());
        for (key, row) in &handles {
            let guard = row
                .try_lock_for(timeout)
                .ok_or_else(|| ReconciliationError::LockTimeout {
                    key: *key,
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })?;
            guards.push((*key, guard));
        }

        let mut locked = LockedRows {
            staged: guards.iter().map(|(_, g)| g.quantity).collect(),
            guards,
            touched: Vec::new(),
        };
        let result = f(&mut locked)?;
        locked.write_back(Utc::now());
        Ok(result)
    }

    /// Overwrite every row with `quantities`; rows absent from the map drop to 0.
    ///
    /// Used by ledger replay. Takes the same row locks as a batch.
    pub fn replace_all(
        &self,
        quantities: &HashMap<StockKey, i64>,
        timeout: Duration,
    ) -> ReconciliationResult<usize> {
        let mut keys: Vec<StockKey> = self.snapshot_rows().into_iter().map(|(k, _)| k).collect();
        keys.extend(quantities.keys().copied());
        let at = Utc::now();

        self.with_locked_rows(&keys, timeout, |rows| {
            let mut changed = 0;
            for i in 0..rows.guards.len() {
                let key = rows.guards[i].0;
                let target = quantities.get(&key).copied().unwrap_or(0);
                if rows.guards[i].1.quantity != target {
                    rows.guards[i].1.quantity = target;
                    rows.guards[i].1.last_updated_at = at;
                    rows.staged[i] = target;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn row(&self, key: StockKey) -> Option<Arc<Mutex<Row>>> {
        self.rows.read().get(&key).cloned()
    }

    fn row_or_create(&self, key: StockKey) -> Arc<Mutex<Row>> {
        if let Some(row) = self.row(key) {
            return row;
        }
        self.rows
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Row {
                    quantity: 0,
                    last_updated_at: Utc::now(),
                }))
            })
            .clone()
    }

    fn snapshot_rows(&self) -> Vec<(StockKey, Arc<Mutex<Row>>)> {
        self.rows
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

/// `current + delta`, refused when a decrease would leave the row negative
/// without `allow_negative`. Raising a row that is already negative is
/// always accepted.
pub(crate) fn next_quantity(
    key: StockKey,
    current: i64,
    delta: i64,
    allow_negative: bool,
) -> ReconciliationResult<i64> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| ReconciliationError::storage(format!("quantity overflow on {key}")))?;
    if next < 0 && delta < 0 && !allow_negative {
        return Err(ReconciliationError::InsufficientStock {
            shortages: vec![StockShortage {
                key,
                requested: delta.unsigned_abs(),
                available: current,
            }],
        });
    }
    Ok(next)
}

fn level(key: StockKey, row: &Row) -> StockLevel {
    StockLevel {
        key,
        quantity_on_hand: row.quantity,
        last_updated_at: row.last_updated_at,
    }
}

/// Rows held for the duration of one batch.
pub struct LockedRows<'a> {
    guards: Vec<(StockKey, MutexGuard<'a, Row>)>,
    staged: Vec<i64>,
    touched: Vec<usize>,
}

impl LockedRows<'_> {
    fn index(&self, key: StockKey) -> ReconciliationResult<usize> {
        self.guards
            .binary_search_by_key(&key, |(k, _)| *k)
            .map_err(|_| ReconciliationError::storage(format!("row {key} was not locked")))
    }

    /// Quantity including deltas already staged in this batch.
    pub fn quantity(&self, key: StockKey) -> ReconciliationResult<i64> {
        Ok(self.staged[self.index(key)?])
    }

    /// Stage `delta` on a locked row and return the resulting quantity.
    ///
    /// Fails with `InsufficientStock` if the row would go negative and the
    /// caller has not allowed it.
    pub fn apply_delta(
        &mut self,
        key: StockKey,
        delta: i64,
        allow_negative: bool,
    ) -> ReconciliationResult<i64> {
        let i = self.index(key)?;
        let next = next_quantity(key, self.staged[i], delta, allow_negative)?;
        self.staged[i] = next;
        if !self.touched.contains(&i) {
            self.touched.push(i);
        }
        Ok(next)
    }

    /// Quantities of every locked row, as staged.
    pub fn current(&self) -> impl Iterator<Item = (StockKey, i64)> + '_ {
        self.guards
            .iter()
            .zip(&self.staged)
            .map(|((key, _), quantity)| (*key, *quantity))
    }

    fn write_back(&mut self, at: DateTime<Utc>) {
        for &i in &self.touched {
            let row = &mut self.guards[i].1;
            row.quantity = self.staged[i];
            row.last_updated_at = at;
        }
    }
}
