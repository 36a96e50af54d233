use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentNumber, DomainError, ItemVariantId, LocationId,
    UserId,
};
use stockledger_events::Event;
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, MovementBatch, MovementKind, MovementRequest, StockDocument,
};

/// Idempotency transition name of transfer receipt.
pub const RECEIVE: &str = "receive";

/// Transfer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Validated,
    InTransit,
    Received,
    Cancelled,
}

/// Transfer line. `quantity` is what leaves the source; `received` is what
/// arrived, once known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub received: Option<u64>,
}

impl TransferLine {
    /// Received minus sent: negative for shrinkage, positive for overage.
    pub fn discrepancy(&self) -> Option<i128> {
        self.received
            .map(|received| i128::from(received) - i128::from(self.quantity))
    }
}

/// Received quantity for one line, keyed by line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub quantity: u64,
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    id: TransferId,
    number: Option<DocumentNumber>,
    source_id: Option<LocationId>,
    destination_id: Option<LocationId>,
    status: TransferStatus,
    lines: Vec<TransferLine>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    validated_by: Option<UserId>,
    shipped_at: Option<DateTime<Utc>>,
    received_by: Option<UserId>,
    received_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            number: None,
            source_id: None,
            destination_id: None,
            status: TransferStatus::Pending,
            lines: Vec::new(),
            created_by: None,
            created_at: None,
            validated_by: None,
            shipped_at: None,
            received_by: None,
            received_at: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn source_id(&self) -> Option<LocationId> {
        self.source_id
    }

    pub fn destination_id(&self) -> Option<LocationId> {
        self.destination_id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn validated_by(&self) -> Option<UserId> {
        self.validated_by
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Quantity each item needs at the source, summed over lines.
    ///
    /// This is what the pre-flight check at validation compares against the
    /// source location's stock.
    pub fn required_at_source(&self) -> BTreeMap<ItemVariantId, u64> {
        let mut required = BTreeMap::new();
        for line in &self.lines {
            let entry = required.entry(line.item_variant_id).or_insert(0u64);
            *entry = entry.saturating_add(line.quantity);
        }
        required
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub number: DocumentNumber,
    pub source_id: LocationId,
    pub destination_id: LocationId,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddTransferLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTransferLine {
    pub transfer_id: TransferId,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ValidateTransfer.
///
/// The caller runs the source stock pre-flight check before submitting this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateTransfer {
    pub transfer_id: TransferId,
    pub validated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipTransfer {
    pub transfer_id: TransferId,
    pub shipped_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveTransfer. Lines absent from `lines` are received in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransfer {
    pub transfer_id: TransferId,
    pub lines: Vec<ReceivedLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    CreateTransfer(CreateTransfer),
    AddTransferLine(AddTransferLine),
    ValidateTransfer(ValidateTransfer),
    ShipTransfer(ShipTransfer),
    ReceiveTransfer(ReceiveTransfer),
    CancelTransfer(CancelTransfer),
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub number: DocumentNumber,
    pub source_id: LocationId,
    pub destination_id: LocationId,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineAdded {
    pub transfer_id: TransferId,
    pub line_no: u32,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferValidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferValidated {
    pub transfer_id: TransferId,
    pub validated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferShipped {
    pub transfer_id: TransferId,
    pub shipped_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferReceived. One entry per line, in line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceived {
    pub transfer_id: TransferId,
    pub lines: Vec<ReceivedLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    TransferLineAdded(TransferLineAdded),
    TransferValidated(TransferValidated),
    TransferShipped(TransferShipped),
    TransferReceived(TransferReceived),
    TransferCancelled(TransferCancelled),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "transfers.transfer.created",
            TransferEvent::TransferLineAdded(_) => "transfers.transfer.line_added",
            TransferEvent::TransferValidated(_) => "transfers.transfer.validated",
            TransferEvent::TransferShipped(_) => "transfers.transfer.shipped",
            TransferEvent::TransferReceived(_) => "transfers.transfer.received",
            TransferEvent::TransferCancelled(_) => "transfers.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::TransferLineAdded(e) => e.occurred_at,
            TransferEvent::TransferValidated(e) => e.occurred_at,
            TransferEvent::TransferShipped(e) => e.occurred_at,
            TransferEvent::TransferReceived(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.number = Some(e.number.clone());
                self.source_id = Some(e.source_id);
                self.destination_id = Some(e.destination_id);
                self.status = TransferStatus::Pending;
                self.lines.clear();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            TransferEvent::TransferLineAdded(e) => {
                self.lines.push(TransferLine {
                    line_no: e.line_no,
                    item_variant_id: e.item_variant_id,
                    quantity: e.quantity,
                    received: None,
                });
            }
            TransferEvent::TransferValidated(e) => {
                self.status = TransferStatus::Validated;
                self.validated_by = Some(e.validated_by);
            }
            TransferEvent::TransferShipped(e) => {
                self.status = TransferStatus::InTransit;
                self.shipped_at = Some(e.occurred_at);
            }
            TransferEvent::TransferReceived(e) => {
                for received in &e.lines {
                    let line = self.lines.iter_mut().find(|l| l.line_no == received.line_no);
                    if let Some(line) = line {
                        line.received = Some(received.quantity);
                    }
                }
                self.status = TransferStatus::Received;
                self.received_by = Some(e.received_by);
                self.received_at = Some(e.occurred_at);
            }
            TransferEvent::TransferCancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.cancel_reason = e.reason.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::CreateTransfer(cmd) => self.handle_create(cmd),
            TransferCommand::AddTransferLine(cmd) => self.handle_add_line(cmd),
            TransferCommand::ValidateTransfer(cmd) => self.handle_validate(cmd),
            TransferCommand::ShipTransfer(cmd) => self.handle_ship(cmd),
            TransferCommand::ReceiveTransfer(cmd) => self.handle_receive(cmd),
            TransferCommand::CancelTransfer(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Transfer {
    fn ensure_exists(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        if cmd.source_id == cmd.destination_id {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }

        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            transfer_id: cmd.transfer_id,
            number: cmd.number.clone(),
            source_id: cmd.source_id,
            destination_id: cmd.destination_id,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddTransferLine) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;

        if self.status != TransferStatus::Pending {
            return Err(DomainError::conflict(
                "lines can only be added to a pending transfer",
            ));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if i64::try_from(cmd.quantity).is_err() {
            return Err(DomainError::validation("quantity is out of range"));
        }

        Ok(vec![TransferEvent::TransferLineAdded(TransferLineAdded {
            transfer_id: cmd.transfer_id,
            line_no: (self.lines.len() as u32) + 1,
            item_variant_id: cmd.item_variant_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;

        if self.status != TransferStatus::Pending {
            return Err(DomainError::conflict("only pending transfers can be validated"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot validate a transfer without lines"));
        }

        Ok(vec![TransferEvent::TransferValidated(TransferValidated {
            transfer_id: cmd.transfer_id,
            validated_by: cmd.validated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;

        if self.status != TransferStatus::Validated {
            return Err(DomainError::conflict("only validated transfers can be shipped"));
        }

        Ok(vec![TransferEvent::TransferShipped(TransferShipped {
            transfer_id: cmd.transfer_id,
            shipped_by: cmd.shipped_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;

        if !matches!(
            self.status,
            TransferStatus::Validated | TransferStatus::InTransit
        ) {
            return Err(DomainError::conflict(format!(
                "transfer cannot be received in status {:?}",
                self.status
            )));
        }

        for received in &cmd.lines {
            if !self.lines.iter().any(|l| l.line_no == received.line_no) {
                return Err(DomainError::validation(format!(
                    "unknown transfer line {}",
                    received.line_no
                )));
            }
            if i64::try_from(received.quantity).is_err() {
                return Err(DomainError::validation("received quantity is out of range"));
            }
        }

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
                    .map_or(line.quantity, |r| r.quantity),
            })
            .collect();

        Ok(vec![TransferEvent::TransferReceived(TransferReceived {
            transfer_id: cmd.transfer_id,
            lines,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;

        if matches!(
            self.status,
            TransferStatus::Received | TransferStatus::Cancelled
        ) {
            return Err(DomainError::conflict(format!(
                "transfer cannot be cancelled in status {:?}",
                self.status
            )));
        }

        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            transfer_id: cmd.transfer_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn label(&self) -> String {
        self.number
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

impl StockDocument for Transfer {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::Transfer(self.id.0)
    }

    fn open_stock_transitions(&self) -> &'static [&'static str] {
        match (self.created, self.status) {
            (true, TransferStatus::Validated | TransferStatus::InTransit) => &[RECEIVE],
            _ => &[],
        }
    }

    /// Per line: TransferOut of the sent quantity at the source, then TransferIn
    /// of the received quantity at the destination (skipped when nothing arrived).
    fn stock_batch(&self, events: &[TransferEvent]) -> Option<MovementBatch> {
        let source = self.source_id?;
        let destination = self.destination_id?;
        let received = events.iter().find_map(|event| match event {
            TransferEvent::TransferReceived(e) => Some(e),
            _ => None,
        })?;

        let label = self.label();
        let mut requests = Vec::with_capacity(self.lines.len() * 2);
        for line in &self.lines {
            let arrived = received
                .lines
                .iter()
                .find(|r| r.line_no == line.line_no)
                .map_or(line.quantity, |r| r.quantity);

            requests.push(
                MovementRequest::movement(
                    line.item_variant_id,
                    source,
                    MovementKind::TransferOut,
                    line.quantity,
                    self.document_ref(),
                    received.received_by,
                )
                .with_reason(format!("transfer {label} to {destination}")),
            );
            if arrived > 0 {
                requests.push(
                    MovementRequest::movement(
                        line.item_variant_id,
                        destination,
                        MovementKind::TransferIn,
                        arrived,
                        self.document_ref(),
                        received.received_by,
                    )
                    .with_reason(format!("transfer {label} from {source}")),
                );
            }
        }

        Some(MovementBatch::new(
            IdempotencyKey::new(self.document_ref(), RECEIVE),
            requests,
        ))
    }
}
