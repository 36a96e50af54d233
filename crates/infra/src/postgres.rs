//! Postgres backend for the stock store and the document event store.
//!
//! `commit` runs as one transaction:
//!
//! ```text
//! SET LOCAL lock_timeout
//!   ↓
//! ensure + SELECT ... FOR UPDATE every pair, in key order
//!   ↓
//! re-check the idempotency record
//!   ↓
//! plan, UPDATE quantities, INSERT movements in line order, INSERT batch record
//!   ↓
//! COMMIT
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | ReconciliationError |
//! |------------|----------------------|---------------------|
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (deadlock detected) | `40P01` | `LockTimeout` |
//! | Database (unique violation on `stock_batches`) | `23505` | replay of the recorded batch |
//! | anything else | any | `Storage` |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockledger_core::{AggregateId, ItemVariantId, LocationId, MovementId, UserId};
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, Movement, MovementBatch, MovementKind, MovementRequest,
    ReconciliationError, ReconciliationResult, StockKey, StockLevel,
};

use crate::config::LedgerConfig;
use crate::quantity_store::next_quantity;
use crate::stock_store::{CommitOutcome, Planner, RecordedBatch, StockStore};

/// Tables of both Postgres stores. Idempotent; run once at startup.
pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_levels (
    item_variant_id  UUID        NOT NULL,
    location_id      UUID        NOT NULL,
    quantity_on_hand BIGINT      NOT NULL,
    last_updated_at  TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (item_variant_id, location_id)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    sequence         BIGSERIAL   PRIMARY KEY,
    movement_id      UUID        NOT NULL UNIQUE,
    item_variant_id  UUID        NOT NULL,
    location_id      UUID        NOT NULL,
    kind             TEXT        NOT NULL,
    signed_quantity  BIGINT      NOT NULL CHECK (signed_quantity <> 0),
    unit_cost        NUMERIC     NOT NULL,
    document_kind    TEXT        NOT NULL,
    document_id      UUID,
    acting_user_id   UUID        NOT NULL,
    occurred_at      TIMESTAMPTZ NOT NULL,
    reason           TEXT
);
CREATE INDEX IF NOT EXISTS stock_movements_by_pair
    ON stock_movements (item_variant_id, location_id, sequence DESC);
CREATE INDEX IF NOT EXISTS stock_movements_by_document
    ON stock_movements (document_kind, document_id, sequence);

CREATE TABLE IF NOT EXISTS stock_batches (
    document     TEXT        NOT NULL,
    transition   TEXT        NOT NULL,
    requests     JSONB       NOT NULL,
    movement_ids JSONB       NOT NULL,
    committed_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (document, transition)
);

CREATE TABLE IF NOT EXISTS document_events (
    event_id        UUID        PRIMARY KEY,
    aggregate_id    UUID        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    sequence_number BIGINT      NOT NULL,
    event_type      TEXT        NOT NULL,
    event_version   INTEGER     NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB       NOT NULL,
    UNIQUE (aggregate_id, sequence_number)
);
"#;

/// Connect a pool to `config.database_url`.
pub async fn connect(config: &LedgerConfig) -> ReconciliationResult<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| ReconciliationError::storage("DATABASE_URL is not set"))?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn migrate(&self) -> ReconciliationResult<()> {
        sqlx::raw_sql(POSTGRES_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub async fn get_quantity_async(&self, key: StockKey) -> ReconciliationResult<i64> {
        Ok(self
            .stock_level_async(key)
            .await?
            .map_or(0, |level| level.quantity_on_hand))
    }

    pub async fn stock_level_async(
        &self,
        key: StockKey,
    ) -> ReconciliationResult<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT item_variant_id, location_id, quantity_on_hand, last_updated_at
            FROM stock_levels
            WHERE item_variant_id = $1 AND location_id = $2
            "#,
        )
        .bind(key.item_variant_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_level", e))?;

        row.as_ref()
            .map(level_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode stock_level", e))
    }

    async fn levels_async(
        &self,
        location_id: Option<LocationId>,
    ) -> ReconciliationResult<Vec<StockLevel>> {
        let rows = sqlx::query(
            r#"
            SELECT item_variant_id, location_id, quantity_on_hand, last_updated_at
            FROM stock_levels
            WHERE $1::uuid IS NULL OR location_id = $1
            ORDER BY item_variant_id, location_id
            "#,
        )
        .bind(location_id.map(|l| *l.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_levels", e))?;

        rows.iter()
            .map(level_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode stock_level", e))
    }

    pub async fn list_by_item_location_async(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_movements
            WHERE item_variant_id = $1 AND location_id = $2
            ORDER BY sequence DESC
            LIMIT $3
            "#,
        )
        .bind(key.item_variant_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_item_location", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    pub async fn list_by_document_async(
        &self,
        document: DocumentRef,
    ) -> ReconciliationResult<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_movements
            WHERE document_kind = $1 AND document_id IS NOT DISTINCT FROM $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(document.kind_label())
        .bind(document.document_id().map(|id| *id.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_document", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn ledger_sums_async(
        &self,
        key: Option<StockKey>,
    ) -> ReconciliationResult<BTreeMap<StockKey, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT item_variant_id, location_id, SUM(signed_quantity)::BIGINT AS total
            FROM stock_movements
            WHERE $1::uuid IS NULL OR (item_variant_id = $1 AND location_id = $2)
            GROUP BY item_variant_id, location_id
            "#,
        )
        .bind(key.map(|k| *k.item_variant_id.as_uuid()))
        .bind(key.map(|k| *k.location_id.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_sums", e))?;

        rows.iter()
            .map(|row| {
                let item: Uuid = row.try_get("item_variant_id")?;
                let location: Uuid = row.try_get("location_id")?;
                let total: i64 = row.try_get("total")?;
                Ok((
                    StockKey::new(ItemVariantId::from_uuid(item), LocationId::from_uuid(location)),
                    total,
                ))
            })
            .collect::<Result<BTreeMap<_, _>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("decode ledger_sums", e))
    }

    pub async fn ledger_len_async(&self) -> ReconciliationResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS len FROM stock_movements")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_len", e))?;
        let len: i64 = row
            .try_get("len")
            .map_err(|e| map_sqlx_error("decode ledger_len", e))?;
        Ok(len.unsigned_abs())
    }

    pub async fn recorded_batch_async(
        &self,
        key: &IdempotencyKey,
    ) -> ReconciliationResult<Option<RecordedBatch>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_recorded(&mut *conn, key).await
    }

    /// Commit `batch` with `planned` computed against the locked rows.
    ///
    /// `plan` is synchronous and runs inside the transaction.
    #[instrument(skip(self, batch, plan), fields(key = %batch.key), err)]
    pub async fn commit_async(
        &self,
        batch: &MovementBatch,
        lock_timeout: Duration,
        plan: &mut Planner<'_>,
    ) -> ReconciliationResult<CommitOutcome> {
        let mut keys: Vec<StockKey> = batch.requests.iter().map(MovementRequest::key).collect();
        keys.sort();
        keys.dedup();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        set_lock_timeout(&mut tx, lock_timeout).await?;

        let started = Instant::now();
        let mut current = BTreeMap::new();
        for key in &keys {
            let quantity = lock_row(&mut tx, *key)
                .await
                .map_err(|e| lock_error(e, *key, started))?;
            current.insert(*key, quantity);
        }

        if let Some(recorded) = load_recorded(&mut *tx, &batch.key).await? {
            return Ok(CommitOutcome::AlreadyRecorded(recorded));
        }

        let planned = plan(&current)?;
        let occurred_at = Utc::now();
        let mut running = current;
        let mut written = Vec::with_capacity(planned.len());

        for movement in planned {
            let key = movement.key();
            let available = running.get(&key).copied().unwrap_or(0);
            let next = next_quantity(
                key,
                available,
                movement.signed_quantity,
                movement.allow_negative,
            )?;
            running.insert(key, next);

            sqlx::query(
                r#"
                UPDATE stock_levels SET quantity_on_hand = $3, last_updated_at = $4
                WHERE item_variant_id = $1 AND location_id = $2
                "#,
            )
            .bind(key.item_variant_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(next)
            .bind(occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update stock_levels", e))?;

            let id = MovementId::new();
            let row = sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    movement_id, item_variant_id, location_id, kind, signed_quantity,
                    unit_cost, document_kind, document_id, acting_user_id, occurred_at, reason
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING sequence
                "#,
            )
            .bind(id.as_uuid())
            .bind(key.item_variant_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(movement.kind.label())
            .bind(movement.signed_quantity)
            .bind(movement.unit_cost)
            .bind(movement.document.kind_label())
            .bind(movement.document.document_id().map(|d| *d.as_uuid()))
            .bind(movement.acting_user_id.as_uuid())
            .bind(occurred_at)
            .bind(movement.reason.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert stock_movements", e))?;
            let sequence: i64 = row
                .try_get("sequence")
                .map_err(|e| map_sqlx_error("decode sequence", e))?;

            written.push(movement.into_movement(id, sequence.unsigned_abs(), occurred_at));
        }

        let recorded = RecordedBatch {
            key: batch.key.clone(),
            requests: batch.requests.clone(),
            movement_ids: written.iter().map(|m| m.id).collect(),
        };
        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_batches (document, transition, requests, movement_ids, committed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(batch.key.document.to_string())
        .bind(&batch.key.transition)
        .bind(Json(&recorded.requests))
        .bind(Json(&recorded.movement_ids))
        .bind(occurred_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // A batch without rows to lock raced another call on the same key.
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                debug!("idempotency record inserted concurrently");
                return match self.recorded_batch_async(&batch.key).await? {
                    Some(recorded) => Ok(CommitOutcome::AlreadyRecorded(recorded)),
                    None => Err(ReconciliationError::storage("idempotency record vanished")),
                };
            }
            Err(e) => return Err(map_sqlx_error("insert stock_batches", e)),
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(CommitOutcome::Committed(written))
    }

    /// Overwrite every stored quantity with its ledger sum, under row locks.
    #[instrument(skip(self), err)]
    pub async fn rebuild_from_ledger_async(
        &self,
        lock_timeout: Duration,
    ) -> ReconciliationResult<usize> {
        let sums = self.ledger_sums_async(None).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        set_lock_timeout(&mut tx, lock_timeout).await?;

        let rows = sqlx::query(
            r#"
            SELECT item_variant_id, location_id, quantity_on_hand
            FROM stock_levels
            ORDER BY item_variant_id, location_id
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock stock_levels", e))?;

        let mut stored = BTreeMap::new();
        for row in &rows {
            let item: Uuid = row
                .try_get("item_variant_id")
                .map_err(|e| map_sqlx_error("decode", e))?;
            let location: Uuid = row
                .try_get("location_id")
                .map_err(|e| map_sqlx_error("decode", e))?;
            let quantity: i64 = row
                .try_get("quantity_on_hand")
                .map_err(|e| map_sqlx_error("decode", e))?;
            stored.insert(
                StockKey::new(ItemVariantId::from_uuid(item), LocationId::from_uuid(location)),
                quantity,
            );
        }

        let now = Utc::now();
        let mut changed = 0;
        let keys: Vec<StockKey> = stored.keys().chain(sums.keys()).copied().collect();
        let mut seen = std::collections::BTreeSet::new();
        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            let target = sums.get(&key).copied().unwrap_or(0);
            if stored.get(&key) == Some(&target) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO stock_levels
                    (item_variant_id, location_id, quantity_on_hand, last_updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (item_variant_id, location_id)
                DO UPDATE SET quantity_on_hand = EXCLUDED.quantity_on_hand,
                              last_updated_at = EXCLUDED.last_updated_at
                "#,
            )
            .bind(key.item_variant_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(target)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rebuild stock_levels", e))?;
            changed += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(changed)
    }
}

async fn set_lock_timeout(
    tx: &mut Transaction<'_, Postgres>,
    lock_timeout: Duration,
) -> ReconciliationResult<()> {
    // SET does not take bind parameters.
    let statement = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis().max(1));
    sqlx::query(&statement)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set lock_timeout", e))?;
    Ok(())
}

/// Create the pair's row if missing, then lock it and read its quantity.
async fn lock_row(tx: &mut Transaction<'_, Postgres>, key: StockKey) -> Result<i64, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_levels (item_variant_id, location_id, quantity_on_hand, last_updated_at)
        VALUES ($1, $2, 0, now())
        ON CONFLICT (item_variant_id, location_id) DO NOTHING
        "#,
    )
    .bind(key.item_variant_id.as_uuid())
    .bind(key.location_id.as_uuid())
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT quantity_on_hand FROM stock_levels
        WHERE item_variant_id = $1 AND location_id = $2
        FOR UPDATE
        "#,
    )
    .bind(key.item_variant_id.as_uuid())
    .bind(key.location_id.as_uuid())
    .fetch_one(&mut **tx)
    .await?;
    row.try_get("quantity_on_hand")
}

async fn load_recorded(
    conn: &mut sqlx::PgConnection,
    key: &IdempotencyKey,
) -> ReconciliationResult<Option<RecordedBatch>> {
    let row = sqlx::query(
        r#"
        SELECT requests, movement_ids FROM stock_batches
        WHERE document = $1 AND transition = $2
        "#,
    )
    .bind(key.document.to_string())
    .bind(&key.transition)
    .fetch_optional(conn)
    .await
    .map_err(|e| map_sqlx_error("load stock_batches", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let Json(requests): Json<Vec<MovementRequest>> = row
        .try_get("requests")
        .map_err(|e| map_sqlx_error("decode requests", e))?;
    let Json(movement_ids): Json<Vec<MovementId>> = row
        .try_get("movement_ids")
        .map_err(|e| map_sqlx_error("decode movement_ids", e))?;
    Ok(Some(RecordedBatch {
        key: key.clone(),
        requests,
        movement_ids,
    }))
}

fn level_from_row(row: &PgRow) -> Result<StockLevel, sqlx::Error> {
    let item: Uuid = row.try_get("item_variant_id")?;
    let location: Uuid = row.try_get("location_id")?;
    Ok(StockLevel {
        key: StockKey::new(ItemVariantId::from_uuid(item), LocationId::from_uuid(location)),
        quantity_on_hand: row.try_get("quantity_on_hand")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> ReconciliationResult<Movement> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode stock_movements", e);
    let signed_quantity: i64 = row.try_get("signed_quantity").map_err(decode)?;
    let label: String = row.try_get("kind").map_err(decode)?;
    let kind = MovementKind::from_label(&label, signed_quantity)
        .ok_or_else(|| ReconciliationError::storage(format!("unknown movement kind '{label}'")))?;
    let document_kind: String = row.try_get("document_kind").map_err(decode)?;
    let document_id: Option<Uuid> = row.try_get("document_id").map_err(decode)?;
    let document = document_from_columns(&document_kind, document_id).ok_or_else(|| {
        ReconciliationError::storage(format!("unknown document reference '{document_kind}'"))
    })?;
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    let item: Uuid = row.try_get("item_variant_id").map_err(decode)?;
    let location: Uuid = row.try_get("location_id").map_err(decode)?;
    let user: Uuid = row.try_get("acting_user_id").map_err(decode)?;
    let id: Uuid = row.try_get("movement_id").map_err(decode)?;
    let unit_cost: Decimal = row.try_get("unit_cost").map_err(decode)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(decode)?;

    Ok(Movement {
        id: MovementId::from_uuid(id),
        sequence: sequence.unsigned_abs(),
        item_variant_id: ItemVariantId::from_uuid(item),
        location_id: LocationId::from_uuid(location),
        kind,
        signed_quantity,
        unit_cost,
        document,
        acting_user_id: UserId::from_uuid(user),
        occurred_at,
        reason: row.try_get("reason").map_err(decode)?,
    })
}

fn document_from_columns(kind: &str, id: Option<Uuid>) -> Option<DocumentRef> {
    let id = id.map(AggregateId::from_uuid);
    match (kind, id) {
        ("sale", Some(id)) => Some(DocumentRef::Sale(id)),
        ("purchase", Some(id)) => Some(DocumentRef::Purchase(id)),
        ("transfer", Some(id)) => Some(DocumentRef::Transfer(id)),
        ("count", Some(id)) => Some(DocumentRef::Count(id)),
        ("manual", None) => Some(DocumentRef::Manual),
        _ => None,
    }
}

fn lock_error(err: sqlx::Error, key: StockKey, started: Instant) -> ReconciliationError {
    let code = match &err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    };
    match code.as_deref() {
        Some("55P03") | Some("40P01") => ReconciliationError::LockTimeout {
            key,
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
        _ => map_sqlx_error("lock stock_levels", err),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReconciliationError {
    match err {
        sqlx::Error::Database(db_err) => {
            ReconciliationError::storage(format!(
                "database error in {operation}: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            ReconciliationError::storage(format!("connection pool closed in {operation}"))
        }
        other => ReconciliationError::storage(format!("{operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn runtime() -> ReconciliationResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        ReconciliationError::storage(
            "PostgresStockStore requires a tokio runtime; call it from a blocking task",
        )
    })
}

// The StockStore trait is synchronous; bridge onto the ambient tokio runtime.
impl StockStore for PostgresStockStore {
    fn get_quantity(&self, key: StockKey) -> ReconciliationResult<i64> {
        runtime()?.block_on(self.get_quantity_async(key))
    }

    fn stock_level(&self, key: StockKey) -> ReconciliationResult<Option<StockLevel>> {
        runtime()?.block_on(self.stock_level_async(key))
    }

    fn list_by_location(&self, location_id: LocationId) -> ReconciliationResult<Vec<StockLevel>> {
        runtime()?.block_on(self.levels_async(Some(location_id)))
    }

    fn list_levels(&self) -> ReconciliationResult<Vec<StockLevel>> {
        runtime()?.block_on(self.levels_async(None))
    }

    fn list_by_item_location(
        &self,
        key: StockKey,
        limit: usize,
    ) -> ReconciliationResult<Vec<Movement>> {
        runtime()?.block_on(self.list_by_item_location_async(key, limit))
    }

    fn list_by_document(&self, document: DocumentRef) -> ReconciliationResult<Vec<Movement>> {
        runtime()?.block_on(self.list_by_document_async(document))
    }

    fn sum_by_item_location(&self, key: StockKey) -> ReconciliationResult<i64> {
        let sums = runtime()?.block_on(self.ledger_sums_async(Some(key)))?;
        Ok(sums.get(&key).copied().unwrap_or(0))
    }

    fn ledger_sums(&self) -> ReconciliationResult<BTreeMap<StockKey, i64>> {
        runtime()?.block_on(self.ledger_sums_async(None))
    }

    fn ledger_len(&self) -> ReconciliationResult<u64> {
        runtime()?.block_on(self.ledger_len_async())
    }

    fn recorded_batch(&self, key: &IdempotencyKey) -> ReconciliationResult<Option<RecordedBatch>> {
        runtime()?.block_on(self.recorded_batch_async(key))
    }

    fn commit(
        &self,
        batch: &MovementBatch,
        lock_timeout: Duration,
        plan: &mut Planner<'_>,
    ) -> ReconciliationResult<CommitOutcome> {
        runtime()?.block_on(self.commit_async(batch, lock_timeout, plan))
    }

    fn rebuild_from_ledger(&self, lock_timeout: Duration) -> ReconciliationResult<usize> {
        runtime()?.block_on(self.rebuild_from_ledger_async(lock_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_columns_round_trip_every_reference() {
        let id = AggregateId::new();
        for document in [
            DocumentRef::Sale(id),
            DocumentRef::Purchase(id),
            DocumentRef::Transfer(id),
            DocumentRef::Count(id),
            DocumentRef::Manual,
        ] {
            let decoded = document_from_columns(
                document.kind_label(),
                document.document_id().map(|d| *d.as_uuid()),
            );
            assert_eq!(decoded, Some(document));
        }
        assert_eq!(document_from_columns("manual", Some(*id.as_uuid())), None);
        assert_eq!(document_from_columns("invoice", Some(*id.as_uuid())), None);
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["stock_levels", "stock_movements", "stock_batches", "document_events"] {
            assert!(POSTGRES_SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
