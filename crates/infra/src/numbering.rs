//! Document number allocation.
//!
//! Sequences are monotonic per (location, document kind, month) and restart at
//! 0001 each month. Prefixes come from the location's registered name.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use stockledger_core::{
    DocumentKind, DocumentNumber, DomainError, DomainResult, LocationId, YearMonth,
};
use stockledger_core::numbering::MAX_SEQUENCE;

#[derive(Debug, Default)]
pub struct LocationDirectory {
    names: RwLock<HashMap<LocationId, String>>,
}

impl LocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, location_id: LocationId, name: impl Into<String>) {
        self.names.write().insert(location_id, name.into());
    }

    pub fn name(&self, location_id: LocationId) -> Option<String> {
        self.names.read().get(&location_id).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SequenceKey {
    location_id: LocationId,
    kind: DocumentKind,
    period: YearMonth,
}

#[derive(Debug, Default)]
pub struct DocumentSequence {
    locations: LocationDirectory,
    last: Mutex<HashMap<SequenceKey, u32>>,
}

impl DocumentSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locations(&self) -> &LocationDirectory {
        &self.locations
    }

    /// Allocate the next number for a `kind` document issued at `location_id`.
    ///
    /// Fails once the month's four-digit sequence is exhausted.
    pub fn next(
        &self,
        location_id: LocationId,
        kind: DocumentKind,
        at: DateTime<Utc>,
    ) -> DomainResult<DocumentNumber> {
        let prefix = kind.prefix_for(self.locations.name(location_id).as_deref());
        let period = YearMonth::of(at);
        let key = SequenceKey {
            location_id,
            kind,
            period,
        };

        let mut last = self.last.lock();
        let current = last.get(&key).copied().unwrap_or(0);
        if current >= MAX_SEQUENCE {
            return Err(DomainError::invariant(format!(
                "{kind} numbering exhausted for {prefix} {:04}-{:02}",
                period.year, period.month
            )));
        }
        let number = DocumentNumber::new(prefix, period, current + 1)?;
        last.insert(key, current + 1);
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn sequences_are_per_location_kind_and_month() {
        let seq = DocumentSequence::new();
        let shop = LocationId::new();
        let depot = LocationId::new();
        seq.locations().register(shop, "Marseille Centre");

        let first = seq.next(shop, DocumentKind::Sale, at(2026, 3)).unwrap();
        let second = seq.next(shop, DocumentKind::Sale, at(2026, 3)).unwrap();
        assert_eq!(first.to_string(), "MAR2026030001");
        assert_eq!(second.to_string(), "MAR2026030002");

        let purchase = seq.next(shop, DocumentKind::Purchase, at(2026, 3)).unwrap();
        assert_eq!(purchase.sequence(), 1);

        let unnamed = seq.next(depot, DocumentKind::Sale, at(2026, 3)).unwrap();
        assert_eq!(unnamed.to_string(), "VEN2026030001");

        let next_month = seq.next(shop, DocumentKind::Sale, at(2026, 4)).unwrap();
        assert_eq!(next_month.to_string(), "MAR2026040001");
    }

    #[test]
    fn exhausted_month_is_an_error() {
        let seq = DocumentSequence::new();
        let location = LocationId::new();
        seq.last.lock().insert(
            SequenceKey {
                location_id: location,
                kind: DocumentKind::Count,
                period: YearMonth::of(at(2026, 1)),
            },
            MAX_SEQUENCE,
        );
        assert!(seq.next(location, DocumentKind::Count, at(2026, 1)).is_err());
    }
}
