//! Stock movements: kinds, sign convention, requests and ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, ItemVariantId, LocationId, MovementId, UserId};

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::stock::StockKey;

/// Whether a movement adds to or removes from the on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn of_delta(delta: i64) -> Self {
        if delta < 0 {
            Direction::Decrease
        } else {
            Direction::Increase
        }
    }
}

/// Closed set of movement kinds.
///
/// The sign of a movement is a property of its kind; callers only ever supply an
/// unsigned magnitude. `Adjustment` is the one kind that can go either way and
/// therefore carries its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    InitialStock,
    Inbound,
    Outbound,
    Adjustment { direction: Direction },
    Loss,
    Breakage,
    Return,
    TransferOut,
    TransferIn,
}

impl MovementKind {
    pub fn direction(self) -> Direction {
        match self {
            MovementKind::InitialStock
            | MovementKind::Inbound
            | MovementKind::Return
            | MovementKind::TransferIn => Direction::Increase,
            MovementKind::Outbound
            | MovementKind::Loss
            | MovementKind::Breakage
            | MovementKind::TransferOut => Direction::Decrease,
            MovementKind::Adjustment { direction } => direction,
        }
    }

    pub fn is_adjustment(self) -> bool {
        matches!(self, MovementKind::Adjustment { .. })
    }

    /// Signed quantity for `magnitude` units of this kind.
    pub fn signed(self, magnitude: u64) -> ReconciliationResult<i64> {
        if magnitude == 0 {
            return Err(ReconciliationError::InvalidMovementKind(format!(
                "{} movement with zero magnitude",
                self.label()
            )));
        }
        let magnitude = i64::try_from(magnitude).map_err(|_| {
            ReconciliationError::InvalidMovementKind(format!(
                "{} magnitude {magnitude} exceeds the representable range",
                self.label()
            ))
        })?;
        Ok(match self.direction() {
            Direction::Increase => magnitude,
            Direction::Decrease => -magnitude,
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            MovementKind::InitialStock => "initial_stock",
            MovementKind::Inbound => "inbound",
            MovementKind::Outbound => "outbound",
            MovementKind::Adjustment { .. } => "adjustment",
            MovementKind::Loss => "loss",
            MovementKind::Breakage => "breakage",
            MovementKind::Return => "return",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::TransferIn => "transfer_in",
        }
    }

    /// Inverse of `label()` for adjustments, which need the sign of the stored
    /// quantity to recover their direction.
    pub fn from_label(label: &str, signed_quantity: i64) -> Option<Self> {
        Some(match label {
            "initial_stock" => MovementKind::InitialStock,
            "inbound" => MovementKind::Inbound,
            "outbound" => MovementKind::Outbound,
            "adjustment" => MovementKind::Adjustment {
                direction: Direction::of_delta(signed_quantity),
            },
            "loss" => MovementKind::Loss,
            "breakage" => MovementKind::Breakage,
            "return" => MovementKind::Return,
            "transfer_out" => MovementKind::TransferOut,
            "transfer_in" => MovementKind::TransferIn,
            _ => return None,
        })
    }
}

/// The business document that caused a movement. Exactly one, or none for a
/// manual correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum DocumentRef {
    Sale(AggregateId),
    Purchase(AggregateId),
    Transfer(AggregateId),
    Count(AggregateId),
    Manual,
}

impl DocumentRef {
    /// Whether a movement of `kind` may reference this document.
    pub fn permits(self, kind: MovementKind) -> bool {
        match self {
            DocumentRef::Sale(_) => matches!(kind, MovementKind::Outbound | MovementKind::Return),
            DocumentRef::Purchase(_) => matches!(kind, MovementKind::Inbound),
            DocumentRef::Transfer(_) => {
                matches!(kind, MovementKind::TransferOut | MovementKind::TransferIn)
            }
            DocumentRef::Count(_) => kind.is_adjustment(),
            DocumentRef::Manual => matches!(
                kind,
                MovementKind::InitialStock
                    | MovementKind::Adjustment { .. }
                    | MovementKind::Loss
                    | MovementKind::Breakage
            ),
        }
    }

    pub fn document_id(self) -> Option<AggregateId> {
        match self {
            DocumentRef::Sale(id)
            | DocumentRef::Purchase(id)
            | DocumentRef::Transfer(id)
            | DocumentRef::Count(id) => Some(id),
            DocumentRef::Manual => None,
        }
    }

    pub fn kind_label(self) -> &'static str {
        match self {
            DocumentRef::Sale(_) => "sale",
            DocumentRef::Purchase(_) => "purchase",
            DocumentRef::Transfer(_) => "transfer",
            DocumentRef::Count(_) => "count",
            DocumentRef::Manual => "manual",
        }
    }
}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.document_id() {
            Some(id) => write!(f, "{}/{}", self.kind_label(), id),
            None => f.write_str(self.kind_label()),
        }
    }
}

/// How a request changes the on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockChange {
    /// Move `magnitude` units; the sign comes from `kind`.
    Move { kind: MovementKind, magnitude: u64 },
    /// Bring the pair to exactly `target` units with an adjustment for the
    /// difference, resolved against the quantity current at application time.
    /// Nothing is appended when the pair is already at `target`.
    Reconcile { target: u64 },
}

/// A movement as submitted to the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
    pub change: StockChange,
    pub unit_cost: Decimal,
    pub document: DocumentRef,
    pub acting_user_id: UserId,
    pub reason: Option<String>,
    /// Documented corrective exception: a decreasing adjustment may drive the
    /// pair negative. Illegal on every other kind.
    pub allow_negative: bool,
}

impl MovementRequest {
    /// Request moving `magnitude` units of `kind`.
    pub fn movement(
        item_variant_id: ItemVariantId,
        location_id: LocationId,
        kind: MovementKind,
        magnitude: u64,
        document: DocumentRef,
        acting_user_id: UserId,
    ) -> Self {
        Self {
            item_variant_id,
            location_id,
            change: StockChange::Move { kind, magnitude },
            unit_cost: Decimal::ZERO,
            document,
            acting_user_id,
            reason: None,
            allow_negative: false,
        }
    }

    /// Request bringing the pair to exactly `target` units.
    pub fn reconcile_to(
        item_variant_id: ItemVariantId,
        location_id: LocationId,
        target: u64,
        document: DocumentRef,
        acting_user_id: UserId,
    ) -> Self {
        Self {
            item_variant_id,
            location_id,
            change: StockChange::Reconcile { target },
            unit_cost: Decimal::ZERO,
            document,
            acting_user_id,
            reason: None,
            allow_negative: false,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_variant_id, self.location_id)
    }

    /// Check the request against the kind/sign/document rules.
    ///
    /// Stock availability is not checked here; that needs the locked row.
    pub fn validate(&self) -> ReconciliationResult<()> {
        if self.unit_cost.is_sign_negative() {
            return Err(ReconciliationError::InvalidMovementKind(
                "unit cost cannot be negative".to_string(),
            ));
        }
        match self.change {
            StockChange::Move { kind, magnitude } => {
                kind.signed(magnitude)?;
                if !self.document.permits(kind) {
                    return Err(ReconciliationError::InvalidMovementKind(format!(
                        "{} movement cannot reference a {} document",
                        kind.label(),
                        self.document.kind_label()
                    )));
                }
                let decrease = MovementKind::Adjustment {
                    direction: Direction::Decrease,
                };
                if self.allow_negative && kind != decrease {
                    return Err(ReconciliationError::InvalidMovementKind(format!(
                        "allow_negative is only permitted on decreasing adjustments, not {}",
                        kind.label()
                    )));
                }
            }
            StockChange::Reconcile { target } => {
                if i64::try_from(target).is_err() {
                    return Err(ReconciliationError::InvalidMovementKind(format!(
                        "reconcile target {target} exceeds the representable range"
                    )));
                }
                let adjustment = MovementKind::Adjustment {
                    direction: Direction::Increase,
                };
                if !self.document.permits(adjustment) {
                    return Err(ReconciliationError::InvalidMovementKind(format!(
                        "reconciliation cannot reference a {} document",
                        self.document.kind_label()
                    )));
                }
                if self.allow_negative {
                    return Err(ReconciliationError::InvalidMovementKind(
                        "allow_negative is meaningless on a reconciliation".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve the request against the current quantity of its pair.
    ///
    /// Returns the concrete kind and signed delta, or `None` when a
    /// reconciliation finds the pair already at its target.
    pub fn resolve(&self, current: i64) -> ReconciliationResult<Option<(MovementKind, i64)>> {
        match self.change {
            StockChange::Move { kind, magnitude } => Ok(Some((kind, kind.signed(magnitude)?))),
            StockChange::Reconcile { target } => {
                let target = i64::try_from(target).map_err(|_| {
                    ReconciliationError::InvalidMovementKind(format!(
                        "reconcile target {target} exceeds the representable range"
                    ))
                })?;
                let delta = target - current;
                if delta == 0 {
                    return Ok(None);
                }
                let kind = MovementKind::Adjustment {
                    direction: Direction::of_delta(delta),
                };
                Ok(Some((kind, delta)))
            }
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Position in the ledger (1-based, strictly increasing across the ledger).
    pub sequence: u64,
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
    pub kind: MovementKind,
    pub signed_quantity: i64,
    pub unit_cost: Decimal,
    pub document: DocumentRef,
    pub acting_user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl Movement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_variant_id, self.location_id)
    }

    pub fn magnitude(&self) -> u64 {
        self.signed_quantity.unsigned_abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: MovementKind, magnitude: u64, document: DocumentRef) -> MovementRequest {
        MovementRequest::movement(
            ItemVariantId::new(),
            LocationId::new(),
            kind,
            magnitude,
            document,
            UserId::new(),
        )
    }

    #[test]
    fn outbound_kinds_are_negative() {
        for kind in [
            MovementKind::Outbound,
            MovementKind::Loss,
            MovementKind::Breakage,
            MovementKind::TransferOut,
            MovementKind::Adjustment {
                direction: Direction::Decrease,
            },
        ] {
            assert_eq!(kind.signed(4).unwrap(), -4, "{}", kind.label());
        }
    }

    #[test]
    fn inbound_kinds_are_positive() {
        for kind in [
            MovementKind::InitialStock,
            MovementKind::Inbound,
            MovementKind::Return,
            MovementKind::TransferIn,
            MovementKind::Adjustment {
                direction: Direction::Increase,
            },
        ] {
            assert_eq!(kind.signed(4).unwrap(), 4, "{}", kind.label());
        }
    }

    #[test]
    fn zero_magnitude_is_an_invalid_movement() {
        let err = MovementKind::Inbound.signed(0).unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidMovementKind(_)));
    }

    #[test]
    fn kind_must_match_referenced_document() {
        let purchase = DocumentRef::Purchase(AggregateId::new());
        assert!(request(MovementKind::Inbound, 1, purchase).validate().is_ok());

        let err = request(MovementKind::Outbound, 1, purchase).validate().unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidMovementKind(_)));

        let err = request(MovementKind::Outbound, 1, DocumentRef::Manual)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidMovementKind(_)));
    }

    #[test]
    fn allow_negative_only_on_decreasing_adjustments() {
        let manual = DocumentRef::Manual;
        let ok = request(
            MovementKind::Adjustment {
                direction: Direction::Decrease,
            },
            2,
            manual,
        )
        .allowing_negative();
        assert!(ok.validate().is_ok());

        let bad = request(MovementKind::Loss, 2, manual).allowing_negative();
        assert!(matches!(
            bad.validate(),
            Err(ReconciliationError::InvalidMovementKind(_))
        ));
    }

    #[test]
    fn reconcile_resolves_against_current_quantity() {
        let count = DocumentRef::Count(AggregateId::new());
        let req = MovementRequest::reconcile_to(
            ItemVariantId::new(),
            LocationId::new(),
            27,
            count,
            UserId::new(),
        );
        assert!(req.validate().is_ok());

        let (kind, delta) = req.resolve(30).unwrap().unwrap();
        assert_eq!(delta, -3);
        assert_eq!(
            kind,
            MovementKind::Adjustment {
                direction: Direction::Decrease
            }
        );
        assert!(req.resolve(27).unwrap().is_none());
        assert_eq!(req.resolve(20).unwrap().unwrap().1, 7);
    }

    #[test]
    fn labels_round_trip() {
        let kinds = [
            (MovementKind::InitialStock, 1),
            (MovementKind::Inbound, 1),
            (MovementKind::Outbound, -1),
            (
                MovementKind::Adjustment {
                    direction: Direction::Decrease,
                },
                -1,
            ),
            (MovementKind::TransferIn, 1),
        ];
        for (kind, signed) in kinds {
            assert_eq!(MovementKind::from_label(kind.label(), signed), Some(kind));
        }
        assert_eq!(MovementKind::from_label("teleport", 1), None);
    }

    #[test]
    fn document_ref_serializes_tagged() {
        let id = AggregateId::new();
        let json = serde_json::to_value(DocumentRef::Sale(id)).unwrap();
        assert_eq!(json["type"], "sale");
        assert_eq!(json["id"], id.to_string());
        let manual = serde_json::to_value(DocumentRef::Manual).unwrap();
        assert_eq!(manual["type"], "manual");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_kind() -> impl Strategy<Value = MovementKind> {
            prop_oneof![
                Just(MovementKind::InitialStock),
                Just(MovementKind::Inbound),
                Just(MovementKind::Outbound),
                Just(MovementKind::Adjustment { direction: Direction::Increase }),
                Just(MovementKind::Adjustment { direction: Direction::Decrease }),
                Just(MovementKind::Loss),
                Just(MovementKind::Breakage),
                Just(MovementKind::Return),
                Just(MovementKind::TransferOut),
                Just(MovementKind::TransferIn),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// The sign of a movement always agrees with its kind's direction and
            /// its absolute value is the requested magnitude.
            #[test]
            fn sign_follows_kind(kind in any_kind(), magnitude in 1u64..=(i64::MAX as u64)) {
                let signed = kind.signed(magnitude).unwrap();
                prop_assert_eq!(signed.unsigned_abs(), magnitude);
                prop_assert_eq!(Direction::of_delta(signed), kind.direction());
            }
        }
    }
}
