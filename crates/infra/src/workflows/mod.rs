//! Document workflow services.
//!
//! A workflow transition loads the document, decides the command's events,
//! submits the stock batch those events require to the reconciliation engine
//! and only then appends the events. Any failure before the append leaves the
//! document status unchanged; retrying the transition is safe because the batch
//! is keyed by (document, transition).
//!
//! ```text
//! load + rehydrate  →  decide  →  apply_batch  →  append  →  publish
//!                                    ↑
//!                      LockTimeout: retried up to `lock_retries` times
//! ```

pub mod adjustments;
pub mod counts;
pub mod executor;
pub mod purchasing;
pub mod sales;
pub mod transfers;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use stockledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use stockledger_events::{
    Event, EventBus, EventEnvelope, InMemoryEventBus, StockAlert, Subscription,
};
use stockledger_inventory::{MovementBatch, StockDocument};

use crate::config::LedgerConfig;
use crate::document_gate::DocumentRegistry;
use crate::error::WorkflowResult;
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::numbering::DocumentSequence;
use crate::reconciliation::{BatchReceipt, ReconciliationEngine};
use crate::stock_store::{InMemoryStockStore, StockStore};

pub use adjustments::StockAdjustments;
pub use counts::COUNT_STREAM;
pub use executor::DocumentExecutor;
pub use purchasing::PURCHASE_STREAM;
pub use sales::SALE_STREAM;
pub use transfers::TRANSFER_STREAM;

/// Outcome of a committed document transition.
#[derive(Debug, Clone)]
pub struct Transition<D> {
    /// The document with the transition applied.
    pub document: D,
    /// Events appended to the document stream.
    pub events: Vec<StoredEvent>,
    /// Receipt of the stock batch, for transitions that move stock.
    pub stock: Option<BatchReceipt>,
}

pub struct StockWorkflows<
    S = InMemoryStockStore,
    B = InMemoryEventBus<StockAlert>,
    ES = InMemoryEventStore,
    EB = InMemoryEventBus<EventEnvelope<JsonValue>>,
> {
    engine: Arc<ReconciliationEngine<S, B>>,
    documents: DocumentExecutor<ES, EB>,
    registry: Arc<DocumentRegistry>,
    numbering: DocumentSequence,
}

/// Workflows over in-memory stock, alerts, document events and bus.
pub type InMemoryWorkflows = StockWorkflows;

impl StockWorkflows {
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            InMemoryStockStore::new(),
            InMemoryEventBus::new(),
            InMemoryEventStore::new(),
            InMemoryEventBus::new(),
            config,
        )
    }
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB> {
    /// Wire the engine and the document store together. The engine refuses any
    /// document batch whose transition the registry does not list as open.
    pub fn new(stock: S, alerts: B, events: ES, bus: EB, config: LedgerConfig) -> Self {
        let registry = Arc::new(DocumentRegistry::new());
        let engine = ReconciliationEngine::new(stock, alerts, config).with_gate(registry.clone());
        Self {
            engine: Arc::new(engine),
            documents: DocumentExecutor::new(events, bus),
            registry,
            numbering: DocumentSequence::new(),
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine<S, B>> {
        &self.engine
    }

    pub fn numbering(&self) -> &DocumentSequence {
        &self.numbering
    }

    /// Manual stock operations sharing this engine.
    pub fn adjustments(&self) -> StockAdjustments<S, B> {
        StockAdjustments::new(self.engine.clone())
    }
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB>
where
    S: StockStore,
    B: EventBus<StockAlert>,
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn subscribe_documents(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.documents.bus().subscribe()
    }

    fn load<D>(
        &self,
        aggregate_id: AggregateId,
        make: impl FnOnce(AggregateId) -> D,
    ) -> WorkflowResult<Option<D>>
    where
        D: StockDocument,
        D::Event: DeserializeOwned,
    {
        let (document, _) = self.documents.load(aggregate_id, make)?;
        Ok((document.version() > 0).then_some(document))
    }

    /// Run one document transition, retrying after a row lock timeout.
    ///
    /// `decide` builds the command from the loaded document; `prepare` may
    /// complete the stock batch (valuation) before it is submitted.
    #[instrument(skip_all, fields(stream = stream, document = %aggregate_id), err)]
    fn transition<D>(
        &self,
        stream: &'static str,
        aggregate_id: AggregateId,
        make: impl Fn(AggregateId) -> D,
        decide: impl Fn(&D) -> WorkflowResult<D::Command>,
        prepare: impl Fn(&mut MovementBatch),
    ) -> WorkflowResult<Transition<D>>
    where
        D: StockDocument<Error = DomainError>,
        D::Event: Event + Serialize + DeserializeOwned,
    {
        let lock = self.documents.stream_lock(aggregate_id);
        let retries = self.engine.config().lock_retries;
        let outcome = {
            let _held = lock.lock();
            let mut attempt = 0;
            loop {
                match self.attempt(stream, aggregate_id, &make, &decide, &prepare) {
                    Err(err) if err.is_retryable() && attempt < retries => {
                        attempt += 1;
                        warn!(attempt, error = %err, "retrying transition after lock timeout");
                    }
                    outcome => break outcome,
                }
            }
        };
        drop(lock);
        self.documents.release_stream_lock(aggregate_id);
        outcome
    }

    fn attempt<D>(
        &self,
        stream: &'static str,
        aggregate_id: AggregateId,
        make: &impl Fn(AggregateId) -> D,
        decide: &impl Fn(&D) -> WorkflowResult<D::Command>,
        prepare: &impl Fn(&mut MovementBatch),
    ) -> WorkflowResult<Transition<D>>
    where
        D: StockDocument<Error = DomainError>,
        D::Event: Event + Serialize + DeserializeOwned,
    {
        let (mut document, expected) = self.documents.load(aggregate_id, make)?;
        // The stored stream is authoritative; the registry may predate it.
        self.registry
            .record(document.document_ref(), document.open_stock_transitions());

        let command = decide(&document)?;
        let events = document.handle(&command)?;
        if events.is_empty() {
            return Ok(Transition {
                document,
                events: Vec::new(),
                stock: None,
            });
        }

        let stock = match document.stock_batch(&events) {
            Some(mut batch) => {
                prepare(&mut batch);
                Some(self.engine.apply_batch(&batch)?)
            }
            None => None,
        };

        let stored = self
            .documents
            .persist(aggregate_id, stream, &events, expected)?;
        for event in &events {
            document.apply(event);
        }
        self.registry
            .record(document.document_ref(), document.open_stock_transitions());

        info!(
            events = stored.len(),
            movements = stock.as_ref().map_or(0, |r| r.movement_ids.len()),
            version = document.version(),
            "document transition committed"
        );
        Ok(Transition {
            document,
            events: stored,
            stock,
        })
    }
}
