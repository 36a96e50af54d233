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

/// Idempotency transition name of checkout.
pub const CHECKOUT: &str = "checkout";
/// Idempotency transition name of cancellation.
pub const CANCEL: &str = "cancel";

/// Sale identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub AggregateId);

impl SaleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SaleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sale status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Open,
    Validated,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub pricing: LinePricing,
    pub amounts: LineAmounts,
}

/// Aggregate root: Sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    id: SaleId,
    number: Option<DocumentNumber>,
    location_id: Option<LocationId>,
    status: SaleStatus,
    lines: Vec<SaleLine>,
    totals: DocumentTotals,
    opened_by: Option<UserId>,
    opened_at: Option<DateTime<Utc>>,
    validated_by: Option<UserId>,
    validated_at: Option<DateTime<Utc>>,
    cancelled_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Sale {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: SaleId) -> Self {
        Self {
            id,
            number: None,
            location_id: None,
            status: SaleStatus::Open,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            opened_by: None,
            opened_at: None,
            validated_by: None,
            validated_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SaleId {
        self.id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn lines(&self) -> &[SaleLine] {
        &self.lines
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn opened_by(&self) -> Option<UserId> {
        self.opened_by
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn validated_by(&self) -> Option<UserId> {
        self.validated_by
    }

    pub fn validated_at(&self) -> Option<DateTime<Utc>> {
        self.validated_at
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SaleStatus::Open)
    }
}

impl AggregateRoot for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSale {
    pub sale_id: SaleId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddSaleLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSaleLine {
    pub sale_id: SaleId,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub pricing: LinePricing,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub sale_id: SaleId,
    pub validated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSale {
    pub sale_id: SaleId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleCommand {
    OpenSale(OpenSale),
    AddSaleLine(AddSaleLine),
    Checkout(Checkout),
    CancelSale(CancelSale),
}

/// Event: SaleOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOpened {
    pub sale_id: SaleId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineAdded {
    pub sale_id: SaleId,
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub pricing: LinePricing,
    pub amounts: LineAmounts,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleValidated (checkout). Carries the totals computed at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleValidated {
    pub sale_id: SaleId,
    pub totals: DocumentTotals,
    pub validated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCancelled {
    pub sale_id: SaleId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleEvent {
    SaleOpened(SaleOpened),
    SaleLineAdded(SaleLineAdded),
    SaleValidated(SaleValidated),
    SaleCancelled(SaleCancelled),
}

impl Event for SaleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::SaleOpened(_) => "sales.sale.opened",
            SaleEvent::SaleLineAdded(_) => "sales.sale.line_added",
            SaleEvent::SaleValidated(_) => "sales.sale.validated",
            SaleEvent::SaleCancelled(_) => "sales.sale.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SaleEvent::SaleOpened(e) => e.occurred_at,
            SaleEvent::SaleLineAdded(e) => e.occurred_at,
            SaleEvent::SaleValidated(e) => e.occurred_at,
            SaleEvent::SaleCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Sale {
    type Command = SaleCommand;
    type Event = SaleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SaleEvent::SaleOpened(e) => {
                self.id = e.sale_id;
                self.number = Some(e.number.clone());
                self.location_id = Some(e.location_id);
                self.status = SaleStatus::Open;
                self.lines.clear();
                self.totals = DocumentTotals::default();
                self.opened_by = Some(e.opened_by);
                self.opened_at = Some(e.occurred_at);
                self.created = true;
            }
            SaleEvent::SaleLineAdded(e) => {
                self.lines.push(SaleLine {
                    line_no: e.line_no,
                    item_variant_id: e.item_variant_id,
                    quantity: e.quantity,
                    pricing: e.pricing,
                    amounts: e.amounts,
                });
                // handle_add_line checked the running totals.
                if let Some(totals) = self.totals.with_line(&e.amounts) {
                    self.totals = totals;
                }
            }
            SaleEvent::SaleValidated(e) => {
                self.status = SaleStatus::Validated;
                self.totals = e.totals;
                self.validated_by = Some(e.validated_by);
                self.validated_at = Some(e.occurred_at);
            }
            SaleEvent::SaleCancelled(e) => {
                self.status = SaleStatus::Cancelled;
                self.cancelled_by = Some(e.cancelled_by);
                self.cancelled_at = Some(e.occurred_at);
                self.cancel_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SaleCommand::OpenSale(cmd) => self.handle_open(cmd),
            SaleCommand::AddSaleLine(cmd) => self.handle_add_line(cmd),
            SaleCommand::Checkout(cmd) => self.handle_checkout(cmd),
            SaleCommand::CancelSale(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Sale {
    fn ensure_exists(&self, sale_id: SaleId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != sale_id {
            return Err(DomainError::invariant("sale_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSale) -> Result<Vec<SaleEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sale already exists"));
        }

        Ok(vec![SaleEvent::SaleOpened(SaleOpened {
            sale_id: cmd.sale_id,
            number: cmd.number.clone(),
            location_id: cmd.location_id,
            opened_by: cmd.opened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddSaleLine) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_exists(cmd.sale_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::conflict(
                "cannot modify a sale once it is validated or cancelled",
            ));
        }

        let quantity = i64::try_from(cmd.quantity)
            .map_err(|_| DomainError::validation("quantity is out of range"))?;
        let amounts = cmd.pricing.amounts(quantity)?;
        self.totals.with_line(&amounts).ok_or_else(|| {
            DomainError::validation("document total is out of range")
        })?;
        let line_no = (self.lines.len() as u32) + 1;

        Ok(vec![SaleEvent::SaleLineAdded(SaleLineAdded {
            sale_id: cmd.sale_id,
            line_no,
            item_variant_id: cmd.item_variant_id,
            quantity: cmd.quantity,
            pricing: cmd.pricing,
            amounts,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_checkout(&self, cmd: &Checkout) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_exists(cmd.sale_id)?;

        if self.status != SaleStatus::Open {
            return Err(DomainError::conflict("only open sales can be checked out"));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot check out a sale without lines"));
        }

        // Amounts are re-derived rather than trusting what the line events carried.
        let mut totals = DocumentTotals::default();
        for line in &self.lines {
            let quantity = i64::try_from(line.quantity)
                .map_err(|_| DomainError::validation("quantity is out of range"))?;
            totals.add(&line.pricing.amounts(quantity)?)?;
        }

        Ok(vec![SaleEvent::SaleValidated(SaleValidated {
            sale_id: cmd.sale_id,
            totals,
            validated_by: cmd.validated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelSale) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_exists(cmd.sale_id)?;

        if self.status != SaleStatus::Validated {
            return Err(DomainError::conflict("only validated sales can be cancelled"));
        }

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a cancellation reason is required"));
        }

        Ok(vec![SaleEvent::SaleCancelled(SaleCancelled {
            sale_id: cmd.sale_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn line_requests(
        &self,
        location_id: LocationId,
        kind: MovementKind,
        user: UserId,
        reason: &str,
    ) -> Vec<MovementRequest> {
        self.lines
            .iter()
            .map(|line| {
                MovementRequest::movement(
                    line.item_variant_id,
                    location_id,
                    kind,
                    line.quantity,
                    self.document_ref(),
                    user,
                )
                .with_unit_cost(line.pricing.unit_price)
                .with_reason(reason)
            })
            .collect()
    }

    fn number_label(&self) -> String {
        self.number
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

impl StockDocument for Sale {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::Sale(self.id.0)
    }

    fn open_stock_transitions(&self) -> &'static [&'static str] {
        match (self.created, self.status) {
            (true, SaleStatus::Open) => &[CHECKOUT],
            (true, SaleStatus::Validated) => &[CANCEL],
            _ => &[],
        }
    }

    /// Checkout yields one Outbound per line; cancellation yields one Return per line.
    fn stock_batch(&self, events: &[SaleEvent]) -> Option<MovementBatch> {
        let location_id = self.location_id?;
        events.iter().find_map(|event| match event {
            SaleEvent::SaleValidated(e) => Some(MovementBatch::new(
                IdempotencyKey::new(self.document_ref(), CHECKOUT),
                self.line_requests(
                    location_id,
                    MovementKind::Outbound,
                    e.validated_by,
                    &format!("sale {}", self.number_label()),
                ),
            )),
            SaleEvent::SaleCancelled(e) => Some(MovementBatch::new(
                IdempotencyKey::new(self.document_ref(), CANCEL),
                self.line_requests(
                    location_id,
                    MovementKind::Return,
                    e.cancelled_by,
                    &format!("cancellation of sale {}: {}", self.number_label(), e.reason),
                ),
            )),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_events::execute;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use stockledger_core::{DocumentKind, YearMonth};

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn number() -> DocumentNumber {
        DocumentNumber::new(
            DocumentKind::Sale.default_prefix(),
            YearMonth::new(2026, 3).unwrap(),
            1,
        )
        .unwrap()
    }

    fn run(sale: &mut Sale, cmd: SaleCommand) -> Vec<SaleEvent> {
        execute(sale, &cmd).unwrap()
    }

    fn open_sale_with_line(quantity: u64) -> (Sale, LocationId, ItemVariantId) {
        let sale_id = SaleId::new(AggregateId::new());
        let location_id = LocationId::new();
        let item = ItemVariantId::new();
        let mut sale = Sale::empty(sale_id);
        run(
            &mut sale,
            SaleCommand::OpenSale(OpenSale {
                sale_id,
                number: number(),
                location_id,
                opened_by: UserId::new(),
                occurred_at: test_time(),
            }),
        );
        run(
            &mut sale,
            SaleCommand::AddSaleLine(AddSaleLine {
                sale_id,
                item_variant_id: item,
                quantity,
                pricing: LinePricing::new(dec!(10.00), dec!(0), dec!(20)),
                occurred_at: test_time(),
            }),
        );
        (sale, location_id, item)
    }

    fn checkout(sale: &Sale) -> SaleCommand {
        SaleCommand::Checkout(Checkout {
            sale_id: sale.id_typed(),
            validated_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn overflowing_totals_reject_the_line() {
        let (mut sale, _, _) = open_sale_with_line(1);
        let huge = AddSaleLine {
            sale_id: sale.id_typed(),
            item_variant_id: ItemVariantId::new(),
            quantity: 1,
            pricing: LinePricing::new(Decimal::MAX, dec!(0), dec!(0)),
            occurred_at: test_time(),
        };
        let err = execute(&mut sale, &SaleCommand::AddSaleLine(huge)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(sale.lines().len(), 1);
        assert_eq!(sale.totals().gross, dec!(12.00));
    }

    #[test]
    fn line_amounts_are_derived_from_pricing() {
        let (sale, _, _) = open_sale_with_line(3);
        let line = &sale.lines()[0];
        assert_eq!(line.amounts.net, dec!(30.00));
        assert_eq!(line.amounts.tax, dec!(6.00));
        assert_eq!(sale.totals().gross, dec!(36.00));
    }

    #[test]
    fn checkout_emits_one_outbound_per_line() {
        let (mut sale, location_id, item) = open_sale_with_line(5);
        let events = sale.handle(&checkout(&sale)).unwrap();

        let batch = sale.stock_batch(&events).unwrap();
        assert_eq!(batch.key.transition, CHECKOUT);
        assert_eq!(batch.requests.len(), 1);
        let req = &batch.requests[0];
        assert_eq!(req.item_variant_id, item);
        assert_eq!(req.location_id, location_id);
        assert_eq!(
            req.change,
            stockledger_inventory::StockChange::Move {
                kind: MovementKind::Outbound,
                magnitude: 5
            }
        );
        assert!(batch.validate().is_ok());

        for e in &events {
            sale.apply(e);
        }
        assert_eq!(sale.status(), SaleStatus::Validated);
        assert!(sale.validated_by().is_some());
    }

    #[test]
    fn cancel_is_only_reachable_from_validated() {
        let (mut sale, _, _) = open_sale_with_line(1);
        let cancel = SaleCommand::CancelSale(CancelSale {
            sale_id: sale.id_typed(),
            cancelled_by: UserId::new(),
            reason: "customer changed mind".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            sale.handle(&cancel).unwrap_err(),
            DomainError::Conflict(_)
        ));

        let cmd = checkout(&sale);
        run(&mut sale, cmd);
        let events = sale.handle(&cancel).unwrap();
        let batch = sale.stock_batch(&events).unwrap();
        assert_eq!(batch.key.transition, CANCEL);
        assert_eq!(
            batch.requests[0].change,
            stockledger_inventory::StockChange::Move {
                kind: MovementKind::Return,
                magnitude: 1
            }
        );
        for e in &events {
            sale.apply(e);
        }
        assert_eq!(sale.status(), SaleStatus::Cancelled);
        assert_eq!(sale.cancel_reason(), Some("customer changed mind"));

        // A cancelled sale cannot be cancelled twice.
        assert!(matches!(
            sale.handle(&cancel).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn cannot_modify_validated_sale() {
        let (mut sale, _, _) = open_sale_with_line(1);
        let cmd = checkout(&sale);
        run(&mut sale, cmd);
        let err = sale
            .handle(&SaleCommand::AddSaleLine(AddSaleLine {
                sale_id: sale.id_typed(),
                item_variant_id: ItemVariantId::new(),
                quantity: 1,
                pricing: LinePricing::new(dec!(1), dec!(0), dec!(0)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn checkout_without_lines_is_rejected() {
        let sale_id = SaleId::new(AggregateId::new());
        let mut sale = Sale::empty(sale_id);
        run(
            &mut sale,
            SaleCommand::OpenSale(OpenSale {
                sale_id,
                number: number(),
                location_id: LocationId::new(),
                opened_by: UserId::new(),
                occurred_at: test_time(),
            }),
        );
        assert!(matches!(
            sale.handle(&checkout(&sale)).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let (sale, _, _) = open_sale_with_line(1);
        let err = sale
            .handle(&SaleCommand::AddSaleLine(AddSaleLine {
                sale_id: sale.id_typed(),
                item_variant_id: ItemVariantId::new(),
                quantity: 0,
                pricing: LinePricing::new(dec!(1), dec!(0), dec!(0)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (sale, _, _) = open_sale_with_line(2);
        let before = sale.clone();
        let first = sale.handle(&checkout(&sale)).unwrap();
        assert_eq!(sale, before);
        assert_eq!(sale.stock_batch(&first), sale.stock_batch(&first));
    }

    #[test]
    fn apply_is_deterministic() {
        let (sale, _, _) = open_sale_with_line(2);
        let events = sale.handle(&checkout(&sale)).unwrap();

        let mut a = sale.clone();
        let mut b = sale.clone();
        for e in &events {
            a.apply(e);
            b.apply(e);
        }
        assert_eq!(a, b);
        assert_eq!(a.version(), sale.version() + 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Totals always equal the sum of the line amounts.
            #[test]
            fn totals_are_sum_of_lines(quantities in prop::collection::vec(1u64..500, 1..8)) {
                let sale_id = SaleId::new(AggregateId::new());
                let mut sale = Sale::empty(sale_id);
                run(&mut sale, SaleCommand::OpenSale(OpenSale {
                    sale_id,
                    number: number(),
                    location_id: LocationId::new(),
                    opened_by: UserId::new(),
                    occurred_at: test_time(),
                }));
                for quantity in &quantities {
                    run(&mut sale, SaleCommand::AddSaleLine(AddSaleLine {
                        sale_id,
                        item_variant_id: ItemVariantId::new(),
                        quantity: *quantity,
                        pricing: LinePricing::new(dec!(3.33), dec!(5), dec!(18)),
                        occurred_at: test_time(),
                    }));
                }
                let cmd = checkout(&sale);
                run(&mut sale, cmd);
                let expected =
                    DocumentTotals::sum(sale.lines().iter().map(|l| &l.amounts)).unwrap();
                prop_assert_eq!(sale.totals(), expected);
            }
        }
    }
}
