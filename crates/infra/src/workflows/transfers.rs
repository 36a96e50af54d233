use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;

use stockledger_core::{AggregateId, DocumentKind, ItemVariantId, LocationId, UserId};
use stockledger_events::{EventBus, EventEnvelope, StockAlert};
use stockledger_inventory::{ReconciliationError, StockKey, StockShortage};
use stockledger_transfers::{
    AddTransferLine, CancelTransfer, CreateTransfer, ReceiveTransfer, ReceivedLine, ShipTransfer,
    Transfer, TransferCommand, TransferId, ValidateTransfer,
};

use crate::error::WorkflowResult;
use crate::event_store::EventStore;
use crate::stock_store::StockStore;

use super::{StockWorkflows, Transition};

pub const TRANSFER_STREAM: &str = "transfers.transfer";

fn transfer(id: AggregateId) -> Transfer {
    Transfer::empty(TransferId::new(id))
}

impl<S, B, ES, EB> StockWorkflows<S, B, ES, EB>
where
    S: StockStore,
    B: EventBus<StockAlert>,
    ES: EventStore,
    EB: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a pending transfer, numbered in the source location's sequence.
    pub fn create_transfer(
        &self,
        source_id: LocationId,
        destination_id: LocationId,
        created_by: UserId,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        let number = self
            .numbering
            .next(source_id, DocumentKind::Transfer, occurred_at)?;
        let transfer_id = TransferId::new(AggregateId::new());

        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |_| {
                Ok(TransferCommand::CreateTransfer(CreateTransfer {
                    transfer_id,
                    number: number.clone(),
                    source_id,
                    destination_id,
                    created_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn add_transfer_line(
        &self,
        transfer_id: TransferId,
        item_variant_id: ItemVariantId,
        quantity: u64,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |_| {
                Ok(TransferCommand::AddTransferLine(AddTransferLine {
                    transfer_id,
                    item_variant_id,
                    quantity,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Validate the transfer after checking the source holds every line.
    ///
    /// The check reads current quantities without locking; stock is only
    /// moved, and checked again under lock, on receipt.
    pub fn validate_transfer(
        &self,
        transfer_id: TransferId,
        validated_by: UserId,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |document| {
                if let Some(source_id) = document.source_id() {
                    self.check_source_stock(document, source_id)?;
                }
                Ok(TransferCommand::ValidateTransfer(ValidateTransfer {
                    transfer_id,
                    validated_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    fn check_source_stock(&self, document: &Transfer, source_id: LocationId) -> WorkflowResult<()> {
        let mut shortages = Vec::new();
        for (item_variant_id, required) in document.required_at_source() {
            let key = StockKey::new(item_variant_id, source_id);
            let available = self.engine.get_quantity(key)?;
            let enough = i64::try_from(required).is_ok_and(|required| available >= required);
            if !enough {
                shortages.push(StockShortage {
                    key,
                    requested: required,
                    available,
                });
            }
        }
        if shortages.is_empty() {
            return Ok(());
        }
        warn!(shortages = shortages.len(), "transfer source cannot cover its lines");
        Err(ReconciliationError::InsufficientStock { shortages }.into())
    }

    pub fn ship_transfer(
        &self,
        transfer_id: TransferId,
        shipped_by: UserId,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |_| {
                Ok(TransferCommand::ShipTransfer(ShipTransfer {
                    transfer_id,
                    shipped_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    /// Receive the transfer: per line, TransferOut of the sent quantity at the
    /// source and TransferIn of the received quantity at the destination.
    /// Lines absent from `lines` are received in full.
    pub fn receive_transfer(
        &self,
        transfer_id: TransferId,
        lines: Vec<ReceivedLine>,
        received_by: UserId,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |_| {
                Ok(TransferCommand::ReceiveTransfer(ReceiveTransfer {
                    transfer_id,
                    lines: lines.clone(),
                    received_by,
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn cancel_transfer(
        &self,
        transfer_id: TransferId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> WorkflowResult<Transition<Transfer>> {
        let occurred_at = Utc::now();
        self.transition(
            TRANSFER_STREAM,
            transfer_id.0,
            transfer,
            |_| {
                Ok(TransferCommand::CancelTransfer(CancelTransfer {
                    transfer_id,
                    cancelled_by,
                    reason: reason.clone(),
                    occurred_at,
                }))
            },
            |_| {},
        )
    }

    pub fn transfer(&self, transfer_id: TransferId) -> WorkflowResult<Option<Transfer>> {
        self.load(transfer_id.0, transfer)
    }
}

#[cfg(test)]
mod tests {
    use stockledger_inventory::{DocumentRef, MovementKind};
    use stockledger_transfers::TransferStatus;

    use super::*;
    use crate::config::LedgerConfig;
    use crate::workflows::InMemoryWorkflows;
    use crate::workflows::adjustments::ManualMovement;

    struct Setup {
        workflows: InMemoryWorkflows,
        item: ItemVariantId,
        source: LocationId,
        destination: LocationId,
    }

    fn setup(on_hand: u64) -> Setup {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig::default());
        let item = ItemVariantId::new();
        let source = LocationId::new();
        workflows
            .adjustments()
            .record(
                "opening",
                ManualMovement::new(
                    StockKey::new(item, source),
                    MovementKind::InitialStock,
                    on_hand,
                    "opening balance",
                ),
                UserId::new(),
            )
            .unwrap();
        Setup {
            workflows,
            item,
            source,
            destination: LocationId::new(),
        }
    }

    fn transfer_of(setup: &Setup, quantity: u64) -> TransferId {
        let created = setup
            .workflows
            .create_transfer(setup.source, setup.destination, UserId::new())
            .unwrap();
        let transfer_id = created.document.id_typed();
        setup
            .workflows
            .add_transfer_line(transfer_id, setup.item, quantity)
            .unwrap();
        transfer_id
    }

    #[test]
    fn shrinkage_is_visible_between_source_and_destination() {
        let setup = setup(25);
        let transfer_id = transfer_of(&setup, 10);
        let user = UserId::new();

        let validated = setup.workflows.validate_transfer(transfer_id, user).unwrap();
        assert!(validated.stock.is_none());
        let source = StockKey::new(setup.item, setup.source);
        assert_eq!(setup.workflows.engine().get_quantity(source).unwrap(), 25);

        setup.workflows.ship_transfer(transfer_id, user).unwrap();
        let received = setup
            .workflows
            .receive_transfer(
                transfer_id,
                vec![ReceivedLine {
                    line_no: 1,
                    quantity: 8,
                }],
                user,
            )
            .unwrap();
        assert_eq!(received.document.status(), TransferStatus::Received);

        let engine = setup.workflows.engine();
        assert_eq!(engine.get_quantity(StockKey::new(setup.item, setup.source)).unwrap(), 15);
        assert_eq!(engine.get_quantity(StockKey::new(setup.item, setup.destination)).unwrap(), 8);

        let movements = engine
            .list_by_document(DocumentRef::Transfer(transfer_id.0))
            .unwrap();
        let shape: Vec<(MovementKind, i64)> = movements
            .iter()
            .map(|m| (m.kind, m.signed_quantity))
            .collect();
        assert_eq!(
            shape,
            vec![(MovementKind::TransferOut, -10), (MovementKind::TransferIn, 8)]
        );
    }

    #[test]
    fn validation_requires_stock_at_source() {
        let setup = setup(4);
        let transfer_id = transfer_of(&setup, 6);

        let err = setup
            .workflows
            .validate_transfer(transfer_id, UserId::new())
            .unwrap_err();
        match err.reconciliation() {
            Some(ReconciliationError::InsufficientStock { shortages }) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].requested, 6);
                assert_eq!(shortages[0].available, 4);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        let transfer = setup.workflows.transfer(transfer_id).unwrap().unwrap();
        assert_eq!(transfer.status(), TransferStatus::Pending);
    }

    #[test]
    fn receipt_rechecks_the_source_under_lock() {
        let setup = setup(10);
        let transfer_id = transfer_of(&setup, 10);
        let user = UserId::new();
        setup.workflows.validate_transfer(transfer_id, user).unwrap();

        // Stock leaves the source between validation and receipt.
        setup
            .workflows
            .adjustments()
            .record(
                "breakage",
                ManualMovement::new(
                    StockKey::new(setup.item, setup.source),
                    MovementKind::Breakage,
                    3,
                    "dropped pallet",
                ),
                user,
            )
            .unwrap();

        let err = setup
            .workflows
            .receive_transfer(transfer_id, Vec::new(), user)
            .unwrap_err();
        assert!(matches!(
            err.reconciliation(),
            Some(ReconciliationError::InsufficientStock { .. })
        ));
        let transfer = setup.workflows.transfer(transfer_id).unwrap().unwrap();
        assert_eq!(transfer.status(), TransferStatus::Validated);
        let destination = StockKey::new(setup.item, setup.destination);
        assert_eq!(setup.workflows.engine().get_quantity(destination).unwrap(), 0);
    }

    #[test]
    fn received_transfer_cannot_be_cancelled() {
        let setup = setup(5);
        let transfer_id = transfer_of(&setup, 5);
        let user = UserId::new();
        setup.workflows.validate_transfer(transfer_id, user).unwrap();
        setup
            .workflows
            .receive_transfer(transfer_id, Vec::new(), user)
            .unwrap();

        let err = setup
            .workflows
            .cancel_transfer(transfer_id, user, Some("too late".into()))
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
