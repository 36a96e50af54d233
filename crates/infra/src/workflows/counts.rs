use chrono::Utc;
use serde_json::Value as JsonValue;

use stockledger_core::{AggregateId, DocumentKind, ItemVariantId, LocationId, UserId};
use stockledger_counts::{
    CancelCount, CountCommand, CountId, FinalizeCount, OpenCount, PhysicalCount,
    RecordCountedQuantity, SnapshotLine,
};
use stockledger_events::{EventBus, EventEnvelope, StockAlert};
use stockledger_inventory::{MovementBatch, StockKey};

use crate::error::WorkflowResult;
use crate::event_store::EventStore;
use crate::stock_store::StockStore;

use super::{StockWorkflows, Transition};

pub const COUNT_STREAM: &str = "counts.count";

fn count(id: AggregateId) -> PhysicalCount {
    PhysicalCount::empty(CountId::new(id))
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB>
where
    S: StockStore,
    B: EventBus<StockAlert>,
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a count at `location_id`, snapshotting current quantities as the
    /// theoretical quantity of each line.
    ///
    /// With `items` unset, every item holding a stock row at the location is
    /// counted.
    pub fn open_count(
        &self,
        location_id: LocationId,
        items: Option<Vec<ItemVariantId>>,
        opened_by: UserId,
    ) -> WorkflowResult<Transition<PhysicalCount>> {
        let snapshot = match items {
            Some(items) => items
                .into_iter()
                .map(|item_variant_id| {
                    let theoretical = self
                        .engine
                        .get_quantity(StockKey::new(item_variant_id, location_id))?;
                    Ok(SnapshotLine {
                        item_variant_id,
                        theoretical,
                    })
                })
                .collect::<WorkflowResult<Vec<_>>>()?,
            None => self
                .engine
                .list_by_location(location_id)?
                .into_iter()
                .map(|level| SnapshotLine {
                    item_variant_id: level.key.item_variant_id,
                    theoretical: level.quantity_on_hand,
                })
                .collect(),
        };

        let occurred_at = Utc::now();
        let number = self
            .numbering
            .next(location_id, DocumentKind::Count, occurred_at)?;
        let count_id = CountId::new(AggregateId::new());

        self.transition(
            COUNT_STREAM,
            count_id.0,
            count,
            |_| {
                Ok(CountCommand::OpenCount(OpenCount {
                    count_id,
                    number: number.clone(),
                    location_id,
                    snapshot: snapshot.clone(),
                    opened_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Enter the counted quantity of one line; the last entry wins.
    pub fn record_counted_quantity(
        &self,
        count_id: CountId,
        item_variant_id: ItemVariantId,
        quantity: i64,
        comment: Option<String>,
        recorded_by: UserId,
    ) -> WorkflowResult<Transition<PhysicalCount>> {
        let occurred_at = Utc::now();
        self.transition(
            COUNT_STREAM,
            count_id.0,
            count,
            |_| {
                Ok(CountCommand::RecordCountedQuantity(RecordCountedQuantity {
                    count_id,
                    item_variant_id,
                    quantity,
                    comment: comment.clone(),
                    recorded_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Finalize the count: every line whose counted quantity differs from its
    /// snapshot ends at the counted quantity. Other lines keep whatever moved
    /// them while the count was open.
    ///
    /// Corrections are valued at the item's last purchase cost.
    pub fn finalize_count(
        &self,
        count_id: CountId,
        finalized_by: UserId,
    ) -> WorkflowResult<Transition<PhysicalCount>> {
        let occurred_at = Utc::now();
        let policies = self.engine.policies().clone();
        self.transition(
            COUNT_STREAM,
            count_id.0,
            count,
            |_| {
                Ok(CountCommand::FinalizeCount(FinalizeCount {
                    count_id,
                    finalized_by,
                    occurred_at,
                }))
            },
            |batch: &mut MovementBatch| {
                for request in &mut batch.requests {
                    request.unit_cost = policies.valuation_cost(request.key());
                }
            },
        )
    }

    pub fn cancel_count(
        &self,
        count_id: CountId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> WorkflowResult<Transition<PhysicalCount>> {
        let occurred_at = Utc::now();
        self.transition(
            COUNT_STREAM,
            count_id.0,
            count,
            |_| {
                Ok(CountCommand::CancelCount(CancelCount {
                    count_id,
                    cancelled_by,
                    reason: reason.clone(),
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn count(&self, count_id: CountId) -> WorkflowResult<Option<PhysicalCount>> {
        self.load(count_id.0, count)
    }
}
