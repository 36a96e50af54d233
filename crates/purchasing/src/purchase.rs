use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentNumber, DocumentTotals, DomainError,
    ItemVariantId, LineAmounts, LinePricing, LocationId, UserId,
};
use stockledger_events::Event;
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, MovementBatch, MovementKind, MovementRequest, StockDocument,
};

/// Idempotency transition name of goods receipt.
pub const RECEIVE: &str = "receive";

/// Purchase identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub AggregateId);

impl PurchaseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Receiving,
    Received,
    Cancelled,
}

/// Purchase line. `received` stays `None` until the purchase is received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub ordered: u64,
    pub pricing: LinePricing,
    pub amounts: LineAmounts,
    pub received: Option<u64>,
}

impl PurchaseLine {
    /// Ordered quantity not (yet) received.
    pub fn outstanding(&self) -> u64 {
        self.ordered.saturating_sub(self.received.unwrap_or(0))
    }
}

/// Received quantity for one line, keyed by line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub quantity: u64,
}

/// Aggregate root: Purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    id: PurchaseId,
    number: Option<DocumentNumber>,
    location_id: Option<LocationId>,
    supplier: Option<String>,
    status: PurchaseStatus,
    lines: Vec<PurchaseLine>,
    totals: DocumentTotals,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    received_by: Option<UserId>,
    received_at: Option<DateTime<Utc>>,
    cancelled_by: Option<UserId>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Purchase {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseId) -> Self {
        Self {
            id,
            number: None,
            location_id: None,
            supplier: None,
            status: PurchaseStatus::Pending,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            created_by: None,
            created_at: None,
            received_by: None,
            received_at: None,
            cancelled_by: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseId {
        self.id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    /// Destination location of the received goods.
    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn supplier(&self) -> Option<&str> {
        self.supplier.as_deref()
    }

    pub fn status(&self) -> PurchaseStatus {
        self.status
    }

    pub fn lines(&self) -> &[PurchaseLine] {
        &self.lines
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn is_receivable(&self) -> bool {
        matches!(
            self.status,
            PurchaseStatus::Pending | PurchaseStatus::Receiving
        )
    }
}

impl AggregateRoot for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchase {
    pub purchase_id: PurchaseId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub supplier: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPurchaseLine. Purchase lines carry no discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPurchaseLine {
    pub purchase_id: PurchaseId,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub pricing: LinePricing,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginReceiving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginReceiving {
    pub purchase_id: PurchaseId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceivePurchase. Lines absent from `lines` are recorded as not received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePurchase {
    pub purchase_id: PurchaseId,
    pub lines: Vec<ReceivedLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchase {
    pub purchase_id: PurchaseId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseCommand {
    CreatePurchase(CreatePurchase),
    AddPurchaseLine(AddPurchaseLine),
    BeginReceiving(BeginReceiving),
    ReceivePurchase(ReceivePurchase),
    CancelPurchase(CancelPurchase),
}

/// Event: PurchaseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCreated {
    pub purchase_id: PurchaseId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub supplier: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLineAdded {
    pub purchase_id: PurchaseId,
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub pricing: LinePricing,
    pub amounts: LineAmounts,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceivingStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingStarted {
    pub purchase_id: PurchaseId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseReceived. Carries one entry per purchase line, in line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceived {
    pub purchase_id: PurchaseId,
    pub lines: Vec<ReceivedLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCancelled {
    pub purchase_id: PurchaseId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseEvent {
    PurchaseCreated(PurchaseCreated),
    PurchaseLineAdded(PurchaseLineAdded),
    ReceivingStarted(ReceivingStarted),
    PurchaseReceived(PurchaseReceived),
    PurchaseCancelled(PurchaseCancelled),
}

impl Event for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::PurchaseCreated(_) => "purchasing.purchase.created",
            PurchaseEvent::PurchaseLineAdded(_) => "purchasing.purchase.line_added",
            PurchaseEvent::ReceivingStarted(_) => "purchasing.purchase.receiving_started",
            PurchaseEvent::PurchaseReceived(_) => "purchasing.purchase.received",
            PurchaseEvent::PurchaseCancelled(_) => "purchasing.purchase.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseEvent::PurchaseCreated(e) => e.occurred_at,
            PurchaseEvent::PurchaseLineAdded(e) => e.occurred_at,
            PurchaseEvent::ReceivingStarted(e) => e.occurred_at,
            PurchaseEvent::PurchaseReceived(e) => e.occurred_at,
            PurchaseEvent::PurchaseCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Purchase {
    type Command = PurchaseCommand;
    type Event = PurchaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseEvent::PurchaseCreated(e) => {
                self.id = e.purchase_id;
                self.number = Some(e.number.clone());
                self.location_id = Some(e.location_id);
                self.supplier = e.supplier.clone();
                self.status = PurchaseStatus::Pending;
                self.lines.clear();
                self.totals = DocumentTotals::default();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseEvent::PurchaseLineAdded(e) => {
                self.lines.push(PurchaseLine {
                    line_no: e.line_no,
                    item_variant_id: e.item_variant_id,
                    ordered: e.quantity,
                    pricing: e.pricing,
                    amounts: e.amounts,
                    received: None,
                });
                // handle_add_line checked the running totals.
                if let Some(totals) = self.totals.with_line(&e.amounts) {
                    self.totals = totals;
                }
            }
            PurchaseEvent::ReceivingStarted(_) => {
                self.status = PurchaseStatus::Receiving;
            }
            PurchaseEvent::PurchaseReceived(e) => {
                for received in &e.lines {
                    let line = self.lines.iter_mut().find(|l| l.line_no == received.line_no);
                    if let Some(line) = line {
                        line.received = Some(received.quantity);
                    }
                }
                self.status = PurchaseStatus::Received;
                self.received_by = Some(e.received_by);
                self.received_at = Some(e.occurred_at);
            }
            PurchaseEvent::PurchaseCancelled(e) => {
                self.status = PurchaseStatus::Cancelled;
                self.cancelled_by = Some(e.cancelled_by);
                self.cancel_reason = e.reason.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseCommand::CreatePurchase(cmd) => self.handle_create(cmd),
            PurchaseCommand::AddPurchaseLine(cmd) => self.handle_add_line(cmd),
            PurchaseCommand::BeginReceiving(cmd) => self.handle_begin_receiving(cmd),
            PurchaseCommand::ReceivePurchase(cmd) => self.handle_receive(cmd),
            PurchaseCommand::CancelPurchase(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Purchase {
    fn ensure_exists(&self, purchase_id: PurchaseId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != purchase_id {
            return Err(DomainError::invariant("purchase_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase already exists"));
        }

        Ok(vec![PurchaseEvent::PurchaseCreated(PurchaseCreated {
            purchase_id: cmd.purchase_id,
            number: cmd.number.clone(),
            location_id: cmd.location_id,
            supplier: cmd.supplier.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddPurchaseLine) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_id)?;

        if self.status != PurchaseStatus::Pending {
            return Err(DomainError::conflict(
                "lines can only be added to a pending purchase",
            ));
        }

        if !cmd.pricing.discount_percent.is_zero() {
            return Err(DomainError::validation("purchase lines carry no discount"));
        }

        let quantity = i64::try_from(cmd.quantity)
            .map_err(|_| DomainError::validation("quantity is out of range"))?;
        let amounts = cmd.pricing.amounts(quantity)?;
        self.totals.with_line(&amounts).ok_or_else(|| {
            DomainError::validation("document total is out of range")
        })?;
        let line_no = (self.lines.len() as u32) + 1;

        Ok(vec![PurchaseEvent::PurchaseLineAdded(PurchaseLineAdded {
            purchase_id: cmd.purchase_id,
            line_no,
            item_variant_id: cmd.item_variant_id,
            quantity: cmd.quantity,
            pricing: cmd.pricing,
            amounts,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_begin_receiving(
        &self,
        cmd: &BeginReceiving,
    ) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_id)?;

        if self.status != PurchaseStatus::Pending {
            return Err(DomainError::conflict(
                "only pending purchases can start receiving",
            ));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot receive goods for an empty purchase",
            ));
        }

        Ok(vec![PurchaseEvent::ReceivingStarted(ReceivingStarted {
            purchase_id: cmd.purchase_id,
            started_by: cmd.started_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceivePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_id)?;

        if !self.is_receivable() {
            return Err(DomainError::conflict(format!(
                "purchase cannot be received in status {:?}",
                self.status
            )));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot receive goods for an empty purchase",
            ));
        }

        for received in &cmd.lines {
            let line = self
                .lines
                .iter()
                .find(|l| l.line_no == received.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown purchase line {}", received.line_no))
                })?;
            if received.quantity > line.ordered {
                return Err(DomainError::validation(format!(
                    "line {}: received {} exceeds ordered {}",
                    line.line_no, received.quantity, line.ordered
                )));
            }
        }

        // Normalise to one entry per line, in line order; the last entry for a line wins.
        let lines = self
            .lines
            .iter()
            .map(|line| ReceivedLine {
                line_no: line.line_no,
                quantity: cmd
                    .lines
                    .iter()
                    .rev()
                    .find(|r| r.line_no == line.line_no)
                    .map_or(0, |r| r.quantity),
            })
            .collect();

        Ok(vec![PurchaseEvent::PurchaseReceived(PurchaseReceived {
            purchase_id: cmd.purchase_id,
            lines,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_id)?;

        if !self.is_receivable() {
            return Err(DomainError::conflict(format!(
                "purchase cannot be cancelled in status {:?}",
                self.status
            )));
        }

        Ok(vec![PurchaseEvent::PurchaseCancelled(PurchaseCancelled {
            purchase_id: cmd.purchase_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl StockDocument for Purchase {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::Purchase(self.id.0)
    }

    fn open_stock_transitions(&self) -> &'static [&'static str] {
        if self.created && self.is_receivable() {
            &[RECEIVE]
        } else {
            &[]
        }
    }

    fn stock_batch(&self, events: &[PurchaseEvent]) -> Option<MovementBatch> {
        let location_id = self.location_id?;
        let received = events.iter().find_map(|event| match event {
            PurchaseEvent::PurchaseReceived(e) => Some(e),
            _ => None,
        })?;

        let reason = match &self.number {
            Some(number) => format!("receipt of purchase {number}"),
            None => format!("receipt of purchase {}", self.id),
        };

        let requests = received
            .lines
            .iter()
            .filter(|r| r.quantity > 0)
            .filter_map(|r| {
                let line = self.lines.iter().find(|l| l.line_no == r.line_no)?;
                Some(
                    MovementRequest::movement(
                        line.item_variant_id,
                        location_id,
                        MovementKind::Inbound,
                        r.quantity,
                        self.document_ref(),
                        received.received_by,
                    )
                    .with_unit_cost(line.pricing.unit_price)
                    .with_reason(reason.clone()),
                )
            })
            .collect();

        Some(MovementBatch::new(
            IdempotencyKey::new(self.document_ref(), RECEIVE),
            requests,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_events::execute;
    use rust_decimal_macros::dec;
    use stockledger_core::{DocumentKind, YearMonth};
    use stockledger_inventory::StockChange;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(purchase: &mut Purchase, cmd: PurchaseCommand) -> Vec<PurchaseEvent> {
        execute(purchase, &cmd).unwrap()
    }

    fn pending_purchase(ordered: &[u64]) -> Purchase {
        let purchase_id = PurchaseId::new(AggregateId::new());
        let mut purchase = Purchase::empty(purchase_id);
        let cmd = PurchaseCommand::CreatePurchase(CreatePurchase {
            purchase_id,
            number: DocumentNumber::new(
                DocumentKind::Purchase.default_prefix(),
                YearMonth::new(2026, 1).unwrap(),
                7,
            )
            .unwrap(),
            location_id: LocationId::new(),
            supplier: Some("Acme Wholesale".to_string()),
            created_by: UserId::new(),
            occurred_at: test_time(),
        });
        run(&mut purchase, cmd);
        for quantity in ordered {
            let cmd = PurchaseCommand::AddPurchaseLine(AddPurchaseLine {
                purchase_id,
                item_variant_id: ItemVariantId::new(),
                quantity: *quantity,
                pricing: LinePricing::undiscounted(dec!(2.50), dec!(10)),
                occurred_at: test_time(),
            });
            run(&mut purchase, cmd);
        }
        purchase
    }

    fn receive(purchase: &Purchase, lines: Vec<ReceivedLine>) -> PurchaseCommand {
        PurchaseCommand::ReceivePurchase(ReceivePurchase {
            purchase_id: purchase.id_typed(),
            lines,
            received_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn partial_receipt_emits_inbound_for_received_quantity() {
        let mut purchase = pending_purchase(&[100]);
        let events = purchase
            .handle(&receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 60 }]))
            .unwrap();

        let batch = purchase.stock_batch(&events).unwrap();
        assert_eq!(batch.key.transition, RECEIVE);
        assert_eq!(batch.requests.len(), 1);
        assert_eq!(
            batch.requests[0].change,
            StockChange::Move {
                kind: MovementKind::Inbound,
                magnitude: 60
            }
        );
        assert_eq!(batch.requests[0].unit_cost, dec!(2.50));

        for e in &events {
            purchase.apply(e);
        }
        assert_eq!(purchase.status(), PurchaseStatus::Received);
        assert_eq!(purchase.lines()[0].received, Some(60));
        assert_eq!(purchase.lines()[0].outstanding(), 40);
    }

    #[test]
    fn re_receiving_is_a_conflict() {
        let mut purchase = pending_purchase(&[10]);
        let cmd = receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 10 }]);
        run(&mut purchase, cmd);
        let err = purchase
            .handle(&receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 1 }]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn lines_received_at_zero_or_omitted_emit_nothing() {
        let purchase = pending_purchase(&[5, 8, 3]);
        let events = purchase
            .handle(&receive(
                &purchase,
                vec![
                    ReceivedLine { line_no: 1, quantity: 0 },
                    ReceivedLine { line_no: 2, quantity: 8 },
                ],
            ))
            .unwrap();
        let batch = purchase.stock_batch(&events).unwrap();
        assert_eq!(batch.requests.len(), 1);
        assert_eq!(batch.requests[0].item_variant_id, purchase.lines()[1].item_variant_id);
    }

    #[test]
    fn receiving_more_than_ordered_is_rejected() {
        let purchase = pending_purchase(&[5]);
        let err = purchase
            .handle(&receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 6 }]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn receive_is_allowed_from_receiving() {
        let mut purchase = pending_purchase(&[5]);
        let cmd = PurchaseCommand::BeginReceiving(BeginReceiving {
            purchase_id: purchase.id_typed(),
            started_by: UserId::new(),
            occurred_at: test_time(),
        });
        run(&mut purchase, cmd);
        assert_eq!(purchase.status(), PurchaseStatus::Receiving);
        let cmd = receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 5 }]);
        run(&mut purchase, cmd);
        assert_eq!(purchase.status(), PurchaseStatus::Received);
    }

    #[test]
    fn cancelled_purchase_cannot_be_received() {
        let mut purchase = pending_purchase(&[5]);
        let cmd = PurchaseCommand::CancelPurchase(CancelPurchase {
            purchase_id: purchase.id_typed(),
            cancelled_by: UserId::new(),
            reason: Some("supplier out of stock".to_string()),
            occurred_at: test_time(),
        });
        let events = run(&mut purchase, cmd);
        assert!(purchase.stock_batch(&events).is_none());
        let err = purchase
            .handle(&receive(&purchase, vec![ReceivedLine { line_no: 1, quantity: 5 }]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn discounted_purchase_line_is_rejected() {
        let purchase = pending_purchase(&[]);
        let err = purchase
            .handle(&PurchaseCommand::AddPurchaseLine(AddPurchaseLine {
                purchase_id: purchase.id_typed(),
                item_variant_id: ItemVariantId::new(),
                quantity: 1,
                pricing: LinePricing::new(dec!(1), dec!(5), dec!(0)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn totals_are_priced_on_ordered_quantity() {
        let purchase = pending_purchase(&[4, 2]);
        // 2.50 * 6 = 15.00, tax 10% = 1.50
        assert_eq!(purchase.totals().net, dec!(15.00));
        assert_eq!(purchase.totals().gross, dec!(16.50));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// A receipt moves in exactly what was received, never more than ordered.
            #[test]
            fn receipt_moves_in_the_received_quantities(
                lines in prop::collection::vec((1u64..200, 0u64..=100), 1..8),
            ) {
                let ordered: Vec<u64> = lines.iter().map(|(ordered, _)| *ordered).collect();
                let mut purchase = pending_purchase(&ordered);
                let received: Vec<ReceivedLine> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, (ordered, percent))| ReceivedLine {
                        line_no: i as u32 + 1,
                        quantity: ordered * percent / 100,
                    })
                    .collect();

                let cmd = receive(&purchase, received.clone());
                let events = run(&mut purchase, cmd);
                let batch = purchase.stock_batch(&events).unwrap();

                let moved: u64 = batch
                    .requests
                    .iter()
                    .map(|r| match r.change {
                        StockChange::Move { kind: MovementKind::Inbound, magnitude } => magnitude,
                        _ => 0,
                    })
                    .sum();
                let expected: u64 = received.iter().map(|r| r.quantity).sum();
                prop_assert_eq!(moved, expected);
                prop_assert_eq!(
                    batch.requests.len(),
                    received.iter().filter(|r| r.quantity > 0).count()
                );
                for line in purchase.lines() {
                    prop_assert!(line.received.unwrap_or(0) <= line.ordered);
                }
            }
        }
    }
}
