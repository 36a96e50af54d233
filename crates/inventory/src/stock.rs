use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemVariantId, LocationId};

/// Identity of a Quantity Store row: one item variant at one location.
///
/// Ordered so that batches can lock their rows in a global order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub item_variant_id: ItemVariantId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(item_variant_id: ItemVariantId, location_id: LocationId) -> Self {
        Self {
            item_variant_id,
            location_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "item {} @ location {}", self.item_variant_id, self.location_id)
    }
}

/// A Quantity Store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub key: StockKey,
    pub quantity_on_hand: i64,
    pub last_updated_at: DateTime<Utc>,
}
