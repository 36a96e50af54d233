use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentNumber, DomainError, ItemVariantId, LocationId,
    UserId,
};
use stockledger_events::Event;
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, MovementBatch, MovementRequest, StockDocument,
};

/// Idempotency transition name of count finalisation.
pub const FINALIZE: &str = "finalize";

/// Physical count identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountId(pub AggregateId);

impl CountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStatus {
    InProgress,
    Finalized,
    Cancelled,
}

/// Theoretical quantity of one item, copied from the Quantity Store when the
/// count is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub item_variant_id: ItemVariantId,
    pub theoretical: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub item_variant_id: ItemVariantId,
    pub theoretical: i64,
    pub counted: Option<u64>,
    pub comment: Option<String>,
}

impl CountLine {
    /// Quantity found on the shelf; the theoretical quantity until one is entered.
    pub fn real(&self) -> u64 {
        self.counted
            .unwrap_or_else(|| u64::try_from(self.theoretical).unwrap_or(0))
    }

    /// Real minus theoretical.
    pub fn variance(&self) -> i128 {
        i128::from(self.real()) - i128::from(self.theoretical)
    }

    /// The counted quantity, when one was entered and it differs from the
    /// snapshot. Only these lines move stock on finalisation.
    pub fn correction(&self) -> Option<u64> {
        self.counted
            .filter(|counted| i128::from(*counted) != i128::from(self.theoretical))
    }
}

/// Aggregate root: PhysicalCount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalCount {
    id: CountId,
    number: Option<DocumentNumber>,
    location_id: Option<LocationId>,
    status: CountStatus,
    lines: Vec<CountLine>,
    opened_by: Option<UserId>,
    opened_at: Option<DateTime<Utc>>,
    finalized_by: Option<UserId>,
    finalized_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl PhysicalCount {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: CountId) -> Self {
        Self {
            id,
            number: None,
            location_id: None,
            status: CountStatus::InProgress,
            lines: Vec::new(),
            opened_by: None,
            opened_at: None,
            finalized_by: None,
            finalized_at: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CountId {
        self.id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn status(&self) -> CountStatus {
        self.status
    }

    pub fn lines(&self) -> &[CountLine] {
        &self.lines
    }

    pub fn line(&self, item_variant_id: ItemVariantId) -> Option<&CountLine> {
        self.lines
            .iter()
            .find(|l| l.item_variant_id == item_variant_id)
    }

    pub fn opened_by(&self) -> Option<UserId> {
        self.opened_by
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn finalized_by(&self) -> Option<UserId> {
        self.finalized_by
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for PhysicalCount {
    type Id = CountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenCount. `snapshot` is read from the Quantity Store by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCount {
    pub count_id: CountId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub snapshot: Vec<SnapshotLine>,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCountedQuantity. Last write wins per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCountedQuantity {
    pub count_id: CountId,
    pub item_variant_id: ItemVariantId,
    pub quantity: i64,
    pub comment: Option<String>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeCount {
    pub count_id: CountId,
    pub finalized_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCount {
    pub count_id: CountId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountCommand {
    OpenCount(OpenCount),
    RecordCountedQuantity(RecordCountedQuantity),
    FinalizeCount(FinalizeCount),
    CancelCount(CancelCount),
}

/// Event: CountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOpened {
    pub count_id: CountId,
    pub number: DocumentNumber,
    pub location_id: LocationId,
    pub snapshot: Vec<SnapshotLine>,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountedQuantityRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedQuantityRecorded {
    pub count_id: CountId,
    pub item_variant_id: ItemVariantId,
    pub quantity: u64,
    pub comment: Option<String>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountFinalized {
    pub count_id: CountId,
    pub finalized_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCancelled {
    pub count_id: CountId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountEvent {
    CountOpened(CountOpened),
    CountedQuantityRecorded(CountedQuantityRecorded),
    CountFinalized(CountFinalized),
    CountCancelled(CountCancelled),
}

impl Event for CountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CountEvent::CountOpened(_) => "counts.count.opened",
            CountEvent::CountedQuantityRecorded(_) => "counts.count.quantity_recorded",
            CountEvent::CountFinalized(_) => "counts.count.finalized",
            CountEvent::CountCancelled(_) => "counts.count.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CountEvent::CountOpened(e) => e.occurred_at,
            CountEvent::CountedQuantityRecorded(e) => e.occurred_at,
            CountEvent::CountFinalized(e) => e.occurred_at,
            CountEvent::CountCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PhysicalCount {
    type Command = CountCommand;
    type Event = CountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CountEvent::CountOpened(e) => {
                self.id = e.count_id;
                self.number = Some(e.number.clone());
                self.location_id = Some(e.location_id);
                self.status = CountStatus::InProgress;
                self.lines = e
                    .snapshot
                    .iter()
                    .map(|s| CountLine {
                        item_variant_id: s.item_variant_id,
                        theoretical: s.theoretical,
                        counted: None,
                        comment: None,
                    })
                    .collect();
                self.opened_by = Some(e.opened_by);
                self.opened_at = Some(e.occurred_at);
                self.created = true;
            }
            CountEvent::CountedQuantityRecorded(e) => {
                if let Some(line) = self
                    .lines
                    .iter_mut()
                    .find(|l| l.item_variant_id == e.item_variant_id)
                {
                    line.counted = Some(e.quantity);
                    if e.comment.is_some() {
                        line.comment = e.comment.clone();
                    }
                }
            }
            CountEvent::CountFinalized(e) => {
                self.status = CountStatus::Finalized;
                self.finalized_by = Some(e.finalized_by);
                self.finalized_at = Some(e.occurred_at);
            }
            CountEvent::CountCancelled(e) => {
                self.status = CountStatus::Cancelled;
                self.cancel_reason = e.reason.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CountCommand::OpenCount(cmd) => self.handle_open(cmd),
            CountCommand::RecordCountedQuantity(cmd) => self.handle_record(cmd),
            CountCommand::FinalizeCount(cmd) => self.handle_finalize(cmd),
            CountCommand::CancelCount(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PhysicalCount {
    fn ensure_in_progress(&self, count_id: CountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != count_id {
            return Err(DomainError::invariant("count_id mismatch"));
        }
        if self.status != CountStatus::InProgress {
            return Err(DomainError::conflict(format!(
                "count is no longer in progress ({:?})",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCount) -> Result<Vec<CountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("count already exists"));
        }
        if cmd.snapshot.is_empty() {
            return Err(DomainError::validation("a count needs at least one item"));
        }
        for (i, line) in cmd.snapshot.iter().enumerate() {
            if cmd.snapshot[..i]
                .iter()
                .any(|other| other.item_variant_id == line.item_variant_id)
            {
                return Err(DomainError::validation(format!(
                    "item {} appears twice in the count",
                    line.item_variant_id
                )));
            }
        }

        Ok(vec![CountEvent::CountOpened(CountOpened {
            count_id: cmd.count_id,
            number: cmd.number.clone(),
            location_id: cmd.location_id,
            snapshot: cmd.snapshot.clone(),
            opened_by: cmd.opened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordCountedQuantity) -> Result<Vec<CountEvent>, DomainError> {
        self.ensure_in_progress(cmd.count_id)?;

        if self.line(cmd.item_variant_id).is_none() {
            return Err(DomainError::validation(format!(
                "item {} is not part of this count",
                cmd.item_variant_id
            )));
        }
        let quantity = u64::try_from(cmd.quantity)
            .map_err(|_| DomainError::validation("counted quantity cannot be negative"))?;

        Ok(vec![CountEvent::CountedQuantityRecorded(
            CountedQuantityRecorded {
                count_id: cmd.count_id,
                item_variant_id: cmd.item_variant_id,
                quantity,
                comment: cmd.comment.clone(),
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_finalize(&self, cmd: &FinalizeCount) -> Result<Vec<CountEvent>, DomainError> {
        self.ensure_in_progress(cmd.count_id)?;

        Ok(vec![CountEvent::CountFinalized(CountFinalized {
            count_id: cmd.count_id,
            finalized_by: cmd.finalized_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelCount) -> Result<Vec<CountEvent>, DomainError> {
        self.ensure_in_progress(cmd.count_id)?;

        Ok(vec![CountEvent::CountCancelled(CountCancelled {
            count_id: cmd.count_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl StockDocument for PhysicalCount {
    fn document_ref(&self) -> DocumentRef {
        DocumentRef::Count(self.id.0)
    }

    fn open_stock_transitions(&self) -> &'static [&'static str] {
        match (self.created, self.status) {
            (true, CountStatus::InProgress) => &[FINALIZE],
            _ => &[],
        }
    }

    /// Finalisation brings every line whose counted quantity differs from its
    /// snapshot to the counted quantity. Uncounted and unchanged lines are left
    /// alone, along with anything that moved them during the count. The engine
    /// resolves each target against the quantity current under the row lock.
    fn stock_batch(&self, events: &[CountEvent]) -> Option<MovementBatch> {
        let location_id = self.location_id?;
        let finalized = events.iter().find_map(|event| match event {
            CountEvent::CountFinalized(e) => Some(e),
            _ => None,
        })?;

        let label = self
            .number
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| self.id.to_string());

        let requests = self
            .lines
            .iter()
            .filter_map(|line| {
                let real = line.correction()?;
                let mut reason = format!("count {label}: {} -> {real}", line.theoretical);
                if let Some(comment) = &line.comment {
                    reason.push_str(" (");
                    reason.push_str(comment);
                    reason.push(')');
                }
                Some(
                    MovementRequest::reconcile_to(
                        line.item_variant_id,
                        location_id,
                        real,
                        self.document_ref(),
                        finalized.finalized_by,
                    )
                    .with_reason(reason),
                )
            })
            .collect();

        Some(MovementBatch::new(
            IdempotencyKey::new(self.document_ref(), FINALIZE),
            requests,
        ))
    }
}
