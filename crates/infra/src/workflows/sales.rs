use chrono::Utc;
use serde_json::Value as JsonValue;

use stockledger_core::{AggregateId, DocumentKind, ItemVariantId, LinePricing, LocationId, UserId};
use stockledger_events::{EventBus, EventEnvelope, StockAlert};
use stockledger_sales::{AddSaleLine, CancelSale, Checkout, OpenSale, Sale, SaleCommand, SaleId};

use crate::error::WorkflowResult;
use crate::event_store::EventStore;
use crate::stock_store::StockStore;

use super::{StockWorkflows, Transition};

pub const SALE_STREAM: &str = "sales.sale";

fn sale(id: AggregateId) -> Sale {
    Sale::empty(SaleId::new(id))
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB>
where
    S: StockStore,
    B: EventBus<StockAlert>,
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a sale at `location_id` under the location's next sale number.
    pub fn open_sale(
        &self,
        location_id: LocationId,
        opened_by: UserId,
    ) -> WorkflowResult<Transition<Sale>> {
        let occurred_at = Utc::now();
        let number = self.numbering.next(location_id, DocumentKind::Sale, occurred_at)?;
        let sale_id = SaleId::new(AggregateId::new());

        self.transition(
            SALE_STREAM,
            sale_id.0,
            sale,
            |_| {
                Ok(SaleCommand::OpenSale(OpenSale {
                    sale_id,
                    number: number.clone(),
                    location_id,
                    opened_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn add_sale_line(
        &self,
        sale_id: SaleId,
        item_variant_id: ItemVariantId,
        quantity: u64,
        pricing: LinePricing,
    ) -> WorkflowResult<Transition<Sale>> {
        let occurred_at = Utc::now();
        self.transition(
            SALE_STREAM,
            sale_id.0,
            sale,
            |_| {
                Ok(SaleCommand::AddSaleLine(AddSaleLine {
                    sale_id,
                    item_variant_id,
                    quantity,
                    pricing,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Validate the sale and take every line out of the sale's location.
    pub fn checkout(
        &self,
        sale_id: SaleId,
        validated_by: UserId,
    ) -> WorkflowResult<Transition<Sale>> {
        let occurred_at = Utc::now();
        self.transition(
            SALE_STREAM,
            sale_id.0,
            sale,
            |_| {
                Ok(SaleCommand::Checkout(Checkout {
                    sale_id,
                    validated_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Cancel a validated sale, returning every line to stock.
    pub fn cancel_sale(
        &self,
        sale_id: SaleId,
        cancelled_by: UserId,
        reason: impl Into<String>,
    ) -> WorkflowResult<Transition<Sale>> {
        let occurred_at = Utc::now();
        let reason = reason.into();
        self.transition(
            SALE_STREAM,
            sale_id.0,
            sale,
            |_| {
                Ok(SaleCommand::CancelSale(CancelSale {
                    sale_id,
                    cancelled_by,
                    reason: reason.clone(),
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn sale(&self, sale_id: SaleId) -> WorkflowResult<Option<Sale>> {
        self.load(sale_id.0, sale)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use stockledger_core::Aggregate;
    use stockledger_inventory::{
        DocumentRef, MovementKind, ReconciliationError, StockDocument, StockKey,
    };
    use stockledger_sales::{CHECKOUT, SaleStatus};

    use super::*;
    use crate::config::LedgerConfig;
    use crate::error::WorkflowError;
    use crate::workflows::InMemoryWorkflows;
    use crate::workflows::adjustments::ManualMovement;

    fn stocked(quantity: u64) -> (InMemoryWorkflows, StockKey) {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig::default());
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        workflows
            .adjustments()
            .record(
                "opening",
                ManualMovement::new(key, MovementKind::InitialStock, quantity, "opening balance"),
                UserId::new(),
            )
            .unwrap();
        (workflows, key)
    }

    fn sale_of(workflows: &InMemoryWorkflows, key: StockKey, quantity: u64) -> SaleId {
        let user = UserId::new();
        let opened = workflows.open_sale(key.location_id, user).unwrap();
        let sale_id = opened.document.id_typed();
        workflows
            .add_sale_line(
                sale_id,
                key.item_variant_id,
                quantity,
                LinePricing::new(dec!(12.50), dec!(0), dec!(20)),
            )
            .unwrap();
        sale_id
    }

    #[test]
    fn checkout_takes_stock_and_cancel_returns_it() {
        let (workflows, key) = stocked(50);
        let sale_id = sale_of(&workflows, key, 5);

        let validated = workflows.checkout(sale_id, UserId::new()).unwrap();
        assert_eq!(validated.document.status(), SaleStatus::Validated);
        assert_eq!(validated.stock.as_ref().map(|r| r.movement_ids.len()), Some(1));
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 45);

        let cancelled = workflows
            .cancel_sale(sale_id, UserId::new(), "customer changed their mind")
            .unwrap();
        assert_eq!(cancelled.document.status(), SaleStatus::Cancelled);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 50);

        let movements = workflows
            .engine()
            .list_by_document(DocumentRef::Sale(sale_id.0))
            .unwrap();
        let deltas: Vec<i64> = movements.iter().map(|m| m.signed_quantity).collect();
        assert_eq!(deltas, vec![-5, 5]);
    }

    #[test]
    fn short_stock_leaves_the_sale_open() {
        let (workflows, key) = stocked(3);
        let sale_id = sale_of(&workflows, key, 5);

        let err = workflows.checkout(sale_id, UserId::new()).unwrap_err();
        match err.reconciliation() {
            Some(ReconciliationError::InsufficientStock { shortages }) => {
                assert_eq!(shortages[0].requested, 5);
                assert_eq!(shortages[0].available, 3);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        let sale = workflows.sale(sale_id).unwrap().unwrap();
        assert_eq!(sale.status(), SaleStatus::Open);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 3);
    }

    #[test]
    fn second_checkout_is_a_conflict_and_moves_nothing() {
        let (workflows, key) = stocked(10);
        let sale_id = sale_of(&workflows, key, 4);
        workflows.checkout(sale_id, UserId::new()).unwrap();

        let err = workflows.checkout(sale_id, UserId::new()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 6);
    }

    #[test]
    fn stale_checkout_batch_is_replayed_not_reapplied() {
        let (workflows, key) = stocked(10);
        let sale_id = sale_of(&workflows, key, 4);
        let before = workflows.sale(sale_id).unwrap().unwrap();
        let committed = workflows.checkout(sale_id, UserId::new()).unwrap();

        // The batch a retrying caller would compute from its pre-checkout copy.
        let events = before
            .handle(&SaleCommand::Checkout(Checkout {
                sale_id,
                validated_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let batch = before.stock_batch(&events).unwrap();
        assert_eq!(batch.key.transition, CHECKOUT);

        let receipt = workflows.engine().apply_batch(&batch).unwrap();
        assert!(receipt.replayed);
        assert_eq!(Some(receipt.movement_ids), committed.stock.map(|r| r.movement_ids));
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 6);
    }

    #[test]
    fn numbers_follow_the_location_sequence() {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig::default());
        let location = LocationId::new();
        workflows.numbering().locations().register(location, "Marché central");

        let first = workflows.open_sale(location, UserId::new()).unwrap();
        let second = workflows.open_sale(location, UserId::new()).unwrap();
        let first = first.document.number().unwrap().to_string();
        let second = second.document.number().unwrap().to_string();
        assert!(first.starts_with("MAR") && first.ends_with("0001"));
        assert!(second.ends_with("0002"));
    }

    #[test]
    fn unknown_sale_is_not_found() {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig::default());
        let err = workflows
            .checkout(SaleId::new(AggregateId::new()), UserId::new())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Domain(_)));
        assert!(workflows.sale(SaleId::new(AggregateId::new())).unwrap().is_none());
    }
}
