//! Document persistence for workflow transitions.
//!
//! ```text
//! 1. Load the document stream and check it is well formed
//!   ↓
//! 2. Rehydrate the document by folding its history
//!   ↓
//! 3. (workflow) decide events, apply the stock batch
//!   ↓
//! 4. Append the decided events with an exact expected version
//!   ↓
//! 5. Publish the committed events on the bus
//! ```
//!
//! Steps 1, 2, 4 and 5 live here; the workflow composes them around step 3.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use stockledger_core::{Aggregate, AggregateId, ExpectedVersion};
use stockledger_events::{EventBus, EventEnvelope};

use crate::error::{WorkflowError, WorkflowResult};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub struct DocumentExecutor<ES, EB> {
    store: ES,
    bus: EB,
    stream_locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl<ES, EB> DocumentExecutor<ES, EB> {
    pub fn new(store: ES, bus: EB) -> Self {
        Self {
            store,
            bus,
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EB {
        &self.bus
    }

    /// In-process lock serialising transitions of one document, so that a batch
    /// applied to stock is never orphaned by a competing append in this process.
    pub fn stream_lock(&self, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        self.stream_locks
            .lock()
            .entry(aggregate_id)
            .or_default()
            .clone()
    }

    /// Forget the lock of `aggregate_id` unless some caller still holds it. It
    /// is recreated on the next transition.
    pub fn release_stream_lock(&self, aggregate_id: AggregateId) {
        let mut locks = self.stream_locks.lock();
        if locks
            .get(&aggregate_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&aggregate_id);
        }
    }
}

impl<ES, EB> DocumentExecutor<ES, EB>
where
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate a document and return it with the version to expect on append.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> WorkflowResult<(A, ExpectedVersion)>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok((aggregate, expected))
    }

    /// Append decided events, then publish them.
    ///
    /// A failed publish is logged, not returned: the events are durable and the
    /// transition has happened.
    pub fn persist<E>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: &[E],
        expected: ExpectedVersion,
    ) -> WorkflowResult<Vec<StoredEvent>>
    where
        E: stockledger_events::Event + Serialize,
    {
        let uncommitted = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    aggregate_id = %aggregate_id,
                    event_type = %stored.event_type,
                    error = ?e,
                    "document event publication failed"
                );
            }
        }
        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> WorkflowResult<()> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))
            .into());
        }
        if e.sequence_number <= last {
            return Err(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))
            .into());
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> WorkflowResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| WorkflowError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
