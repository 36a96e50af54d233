//! Human-readable document numbers: `PREFIX + YYYY + MM + NNNN`.
//!
//! The prefix is derived from the location's name (first three letters, upper
//! case) and falls back to a per-kind default. Sequences are scoped per location,
//! document kind and calendar month; allocation lives in the infrastructure layer.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Highest sequence representable with four digits.
pub const MAX_SEQUENCE: u32 = 9_999;

/// Kind of stock-affecting document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Sale,
    Purchase,
    Transfer,
    Count,
}

impl DocumentKind {
    pub fn default_prefix(self) -> &'static str {
        match self {
            DocumentKind::Sale => "VEN",
            DocumentKind::Purchase => "ACH",
            DocumentKind::Transfer => "TRF",
            DocumentKind::Count => "INV",
        }
    }

    /// Prefix for a document issued at a location with the given display name.
    pub fn prefix_for(self, location_name: Option<&str>) -> String {
        let from_name: String = location_name
            .map(str::trim)
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_alphabetic())
            .take(3)
            .flat_map(char::to_uppercase)
            .collect();

        if from_name.is_empty() {
            self.default_prefix().to_string()
        } else {
            from_name
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentKind::Sale => "sale",
            DocumentKind::Purchase => "purchase",
            DocumentKind::Transfer => "transfer",
            DocumentKind::Count => "count",
        };
        f.write_str(s)
    }
}

/// Calendar month a sequence is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!("invalid month {month}")));
        }
        if !(0..=9999).contains(&year) {
            return Err(DomainError::validation(format!("invalid year {year}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }
}

/// A formatted, parseable document number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentNumber {
    prefix: String,
    period: YearMonth,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(
        prefix: impl Into<String>,
        period: YearMonth,
        sequence: u32,
    ) -> Result<Self, DomainError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(DomainError::validation("document number prefix cannot be empty"));
        }
        if prefix.chars().any(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation("document number prefix cannot contain digits"));
        }
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(DomainError::validation(format!(
                "sequence {sequence} out of range 1..={MAX_SEQUENCE}"
            )));
        }
        Ok(Self {
            prefix,
            period,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn period(&self) -> YearMonth {
        self.period
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}{:02}{:04}",
            self.prefix, self.period.year, self.period.month, self.sequence
        )
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Trailing ten characters are YYYYMMNNNN.
        let digits_at = s
            .char_indices()
            .rev()
            .nth(9)
            .map(|(idx, _)| idx)
            .ok_or_else(|| DomainError::invalid_id(format!("document number too short: {s}")))?;
        let (prefix, digits) = s.split_at(digits_at);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!("malformed document number: {s}")));
        }

        let parse = |range: core::ops::Range<usize>| {
            digits[range]
                .parse::<u32>()
                .map_err(|e| DomainError::invalid_id(format!("{s}: {e}")))
        };
        let year = parse(0..4)?;
        let month = parse(4..6)?;
        let sequence = parse(6..10)?;

        let period = YearMonth::new(year as i32, month)?;
        DocumentNumber::new(prefix, period, sequence)
    }
}

impl TryFrom<String> for DocumentNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentNumber> for String {
    fn from(value: DocumentNumber) -> Self {
        value.to_string()
    }
}
