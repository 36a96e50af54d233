//! Per item-at-location policies: low-stock threshold and last purchase cost.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_inventory::StockKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPolicy {
    /// 0 disables the low-stock alert.
    pub low_stock_threshold: u64,
    pub last_purchase_cost: Option<Decimal>,
}

#[derive(Debug, Default)]
pub struct ItemPolicyStore {
    policies: RwLock<HashMap<StockKey, ItemPolicy>>,
}

impl ItemPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(&self, key: StockKey) -> ItemPolicy {
        self.policies.read().get(&key).copied().unwrap_or_default()
    }

    pub fn set_threshold(&self, key: StockKey, threshold: u64) {
        self.policies.write().entry(key).or_default().low_stock_threshold = threshold;
    }

    pub fn threshold(&self, key: StockKey) -> i64 {
        i64::try_from(self.policy(key).low_stock_threshold).unwrap_or(i64::MAX)
    }

    pub fn record_purchase_cost(&self, key: StockKey, unit_cost: Decimal) {
        self.policies.write().entry(key).or_default().last_purchase_cost = Some(unit_cost);
    }

    /// Valuation for movements that carry no price of their own; zero until the
    /// item has been received at the location once.
    pub fn valuation_cost(&self, key: StockKey) -> Decimal {
        self.policy(key).last_purchase_cost.unwrap_or(Decimal::ZERO)
    }
}
