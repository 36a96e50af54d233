//! Stock alerts emitted after a successful batch application.
//!
//! The reconciliation engine compares each touched pair's post-application
//! quantity with the pair's low-stock threshold. Delivery to people (e-mail,
//! in-app notifications) belongs to whoever subscribes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemVariantId, LocationId};

use crate::event::Event;

/// Event: quantity dropped to or below the pair's threshold but is not zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBelowThreshold {
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
    pub current_quantity: i64,
    pub threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the pair has no stock left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDepleted {
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockAlert {
    BelowThreshold(StockBelowThreshold),
    Depleted(StockDepleted),
}

impl StockAlert {
    /// Decide which alert, if any, a post-application quantity raises.
    ///
    /// `threshold == 0` disables the low-stock alert; depletion is only reported
    /// when the batch lowered the pair (`delta < 0`).
    pub fn evaluate(
        item_variant_id: ItemVariantId,
        location_id: LocationId,
        quantity: i64,
        delta: i64,
        threshold: i64,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        if quantity == 0 && delta < 0 {
            return Some(StockAlert::Depleted(StockDepleted {
                item_variant_id,
                location_id,
                occurred_at,
            }));
        }
        if threshold > 0 && quantity > 0 && quantity <= threshold {
            return Some(StockAlert::BelowThreshold(StockBelowThreshold {
                item_variant_id,
                location_id,
                current_quantity: quantity,
                threshold,
                occurred_at,
            }));
        }
        None
    }

    pub fn item_variant_id(&self) -> ItemVariantId {
        match self {
            StockAlert::BelowThreshold(e) => e.item_variant_id,
            StockAlert::Depleted(e) => e.item_variant_id,
        }
    }

    pub fn location_id(&self) -> LocationId {
        match self {
            StockAlert::BelowThreshold(e) => e.location_id,
            StockAlert::Depleted(e) => e.location_id,
        }
    }
}

impl Event for StockAlert {
    fn event_type(&self) -> &'static str {
        match self {
            StockAlert::BelowThreshold(_) => "inventory.stock.below_threshold",
            StockAlert::Depleted(_) => "inventory.stock.depleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockAlert::BelowThreshold(e) => e.occurred_at,
            StockAlert::Depleted(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(quantity: i64, delta: i64, threshold: i64) -> Option<StockAlert> {
        StockAlert::evaluate(
            ItemVariantId::new(),
            LocationId::new(),
            quantity,
            delta,
            threshold,
            Utc::now(),
        )
    }

    #[test]
    fn zero_after_outbound_is_depleted() {
        assert!(matches!(eval(0, -5, 10), Some(StockAlert::Depleted(_))));
    }

    #[test]
    fn at_threshold_is_below_threshold() {
        match eval(10, -1, 10) {
            Some(StockAlert::BelowThreshold(e)) => {
                assert_eq!(e.current_quantity, 10);
                assert_eq!(e.threshold, 10);
            }
            other => panic!("expected BelowThreshold, got {other:?}"),
        }
    }

    #[test]
    fn above_threshold_or_disabled_threshold_is_silent() {
        assert!(eval(11, -1, 10).is_none());
        assert!(eval(3, -1, 0).is_none());
    }

    #[test]
    fn event_type_names_are_stable() {
        let alert = eval(0, -1, 0).unwrap();
        assert_eq!(alert.event_type(), "inventory.stock.depleted");
        assert_eq!(alert.version(), 1);
    }
}
