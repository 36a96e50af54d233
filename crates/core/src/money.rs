//! Monetary amounts for document lines and totals.
//!
//! Amounts are derived, never hand-entered: a line carries quantity, unit price,
//! discount and tax rate, and every amount is recomputed from those. Rounding is to
//! the currency's two decimal places, half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Decimal places of the working currency.
pub const CURRENCY_SCALE: u32 = 2;

/// Round an amount to the currency scale.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Pricing inputs of one line. Percentages are expressed in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePricing {
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_rate_percent: Decimal,
}

impl LinePricing {
    pub fn new(unit_price: Decimal, discount_percent: Decimal, tax_rate_percent: Decimal) -> Self {
        Self {
            unit_price,
            discount_percent,
            tax_rate_percent,
        }
    }

    /// Pricing without discount (purchase lines).
    pub fn undiscounted(unit_price: Decimal, tax_rate_percent: Decimal) -> Self {
        Self::new(unit_price, Decimal::ZERO, tax_rate_percent)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.unit_price.is_sign_negative() {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        if !is_percentage(self.discount_percent) {
            return Err(DomainError::validation("discount must be within 0..=100"));
        }
        if !is_percentage(self.tax_rate_percent) {
            return Err(DomainError::validation("tax rate must be within 0..=100"));
        }
        Ok(())
    }

    /// Compute the line amounts for `quantity` units.
    pub fn amounts(&self, quantity: i64) -> DomainResult<LineAmounts> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.validate()?;

        let gross_before_discount = self
            .unit_price
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(overflow)?;
        let discount_factor = Decimal::ONE - self.discount_percent / Decimal::ONE_HUNDRED;
        let net = round_currency(
            gross_before_discount
                .checked_mul(discount_factor)
                .ok_or_else(overflow)?,
        );
        let tax = round_currency(
            net.checked_mul(self.tax_rate_percent)
                .ok_or_else(overflow)?
                / Decimal::ONE_HUNDRED,
        );
        let gross = net.checked_add(tax).ok_or_else(overflow)?;

        Ok(LineAmounts { net, tax, gross })
    }
}

fn overflow() -> DomainError {
    DomainError::validation("amount is out of range")
}

fn is_percentage(value: Decimal) -> bool {
    !value.is_sign_negative() && value <= Decimal::ONE_HUNDRED
}

/// Derived amounts of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineAmounts {
    /// Amount excluding tax, after discount.
    pub net: Decimal,
    pub tax: Decimal,
    /// Amount including tax.
    pub gross: Decimal,
}

/// Sum of a document's line amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
}

impl DocumentTotals {
    /// These totals with `line` added, or `None` when an amount overflows.
    pub fn with_line(&self, line: &LineAmounts) -> Option<Self> {
        Some(Self {
            net: self.net.checked_add(line.net)?,
            tax: self.tax.checked_add(line.tax)?,
            gross: self.gross.checked_add(line.gross)?,
        })
    }

    /// Add `line` in place. On overflow the totals are left unchanged.
    pub fn add(&mut self, line: &LineAmounts) -> DomainResult<()> {
        *self = self.with_line(line).ok_or_else(overflow)?;
        Ok(())
    }

    pub fn sum<'a, I>(lines: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = &'a LineAmounts>,
    {
        let mut totals = Self::default();
        for line in lines {
            totals.add(line)?;
        }
        Ok(totals)
    }
}
