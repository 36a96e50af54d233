//! Sale documents (event-sourced).
//!
//! A sale is opened at one location, collects priced lines, and is validated at
//! checkout. Checkout takes stock out of the location; cancelling a validated sale
//! puts every line back with compensating movements. This crate holds the pure
//! state machine only; persistence and stock application live in infra.

pub mod sale;

pub use sale::{
    AddSaleLine, CANCEL, CHECKOUT, CancelSale, Checkout, OpenSale, Sale, SaleCancelled,
    SaleCommand, SaleEvent, SaleId, SaleLine, SaleLineAdded, SaleOpened, SaleStatus,
    SaleValidated,
};
