use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;

use stockledger_core::{AggregateId, DocumentKind, ItemVariantId, LinePricing, LocationId, UserId};
use stockledger_events::{EventBus, EventEnvelope, StockAlert};
use stockledger_inventory::StockKey;
use stockledger_purchasing::{
    AddPurchaseLine, BeginReceiving, CancelPurchase, CreatePurchase, Purchase, PurchaseCommand,
    PurchaseId, ReceivePurchase, ReceivedLine,
};

use crate::error::WorkflowResult;
use crate::event_store::EventStore;
use crate::stock_store::StockStore;

use super::{StockWorkflows, Transition};

pub const PURCHASE_STREAM: &str = "purchasing.purchase";

fn purchase(id: AggregateId) -> Purchase {
    Purchase::empty(PurchaseId::new(id))
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB>
where
    S: StockStore,
    B: EventBus<StockAlert>,
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a pending purchase delivering to `location_id`.
    pub fn create_purchase(
        &self,
        location_id: LocationId,
        supplier: Option<String>,
        created_by: UserId,
    ) -> WorkflowResult<Transition<Purchase>> {
        let occurred_at = Utc::now();
        let number = self
            .numbering
            .next(location_id, DocumentKind::Purchase, occurred_at)?;
        let purchase_id = PurchaseId::new(AggregateId::new());

        self.transition(
            PURCHASE_STREAM,
            purchase_id.0,
            purchase,
            |_| {
                Ok(PurchaseCommand::CreatePurchase(CreatePurchase {
                    purchase_id,
                    number: number.clone(),
                    location_id,
                    supplier: supplier.clone(),
                    created_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn add_purchase_line(
        &self,
        purchase_id: PurchaseId,
        item_variant_id: ItemVariantId,
        quantity: u64,
        pricing: LinePricing,
    ) -> WorkflowResult<Transition<Purchase>> {
        let occurred_at = Utc::now();
        self.transition(
            PURCHASE_STREAM,
            purchase_id.0,
            purchase,
            |_| {
                Ok(PurchaseCommand::AddPurchaseLine(AddPurchaseLine {
                    purchase_id,
                    item_variant_id,
                    quantity,
                    pricing,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn begin_receiving(
        &self,
        purchase_id: PurchaseId,
        started_by: UserId,
    ) -> WorkflowResult<Transition<Purchase>> {
        let occurred_at = Utc::now();
        self.transition(
            PURCHASE_STREAM,
            purchase_id.0,
            purchase,
            |_| {
                Ok(PurchaseCommand::BeginReceiving(BeginReceiving {
                    purchase_id,
                    started_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Receive the purchase: one Inbound per line with a positive received
    /// quantity. Lines absent from `lines` are received as zero.
    ///
    /// Every received line's unit price becomes the item's last purchase cost at
    /// the destination.
    pub fn receive_purchase(
        &self,
        purchase_id: PurchaseId,
        lines: Vec<ReceivedLine>,
        received_by: UserId,
    ) -> WorkflowResult<Transition<Purchase>> {
        let occurred_at = Utc::now();
        let transition = self.transition(
            PURCHASE_STREAM,
            purchase_id.0,
            purchase,
            |_| {
                Ok(PurchaseCommand::ReceivePurchase(ReceivePurchase {
                    purchase_id,
                    lines: lines.clone(),
                    received_by,
                    occurred_at,
                }))
            },
            |_| {},
        )?;

        if let Some(location_id) = transition.document.location_id() {
            let policies = self.engine.policies();
            for line in transition.document.lines() {
                if line.received.is_some_and(|received| received > 0) {
                    let key = StockKey::new(line.item_variant_id, location_id);
                    policies.record_purchase_cost(key, line.pricing.unit_price);
                    debug!(
                        %key,
                        unit_cost = %line.pricing.unit_price,
                        "last purchase cost updated"
                    );
                }
            }
        }
        Ok(transition)
    }

    pub fn cancel_purchase(
        &self,
        purchase_id: PurchaseId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> WorkflowResult<Transition<Purchase>> {
        let occurred_at = Utc::now();
        self.transition(
            PURCHASE_STREAM,
            purchase_id.0,
            purchase,
            |_| {
                Ok(PurchaseCommand::CancelPurchase(CancelPurchase {
                    purchase_id,
                    cancelled_by,
                    reason: reason.clone(),
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn purchase(&self, purchase_id: PurchaseId) -> WorkflowResult<Option<Purchase>> {
        self.load(purchase_id.0, purchase)
    }
}
