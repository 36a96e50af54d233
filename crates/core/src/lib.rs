//! `stockledger-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, the aggregate traits used by document
//! workflows, money arithmetic and the document number format.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod numbering;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, ItemVariantId, LocationId, MovementId, UserId};
pub use money::{DocumentTotals, LineAmounts, LinePricing};
pub use numbering::{DocumentKind, DocumentNumber, YearMonth};
