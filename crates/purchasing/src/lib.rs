//! Purchase documents (event-sourced).
//!
//! A purchase orders goods from a supplier into one destination location. Goods
//! are received once, possibly partially; each received line becomes an inbound
//! movement at the destination.

pub mod purchase;

pub use purchase::{
    AddPurchaseLine, BeginReceiving, CancelPurchase, CreatePurchase, Purchase,
    PurchaseCancelled, PurchaseCommand, PurchaseCreated, PurchaseEvent, PurchaseId, PurchaseLine,
    PurchaseLineAdded, PurchaseReceived, PurchaseStatus, RECEIVE, ReceivePurchase, ReceivedLine,
    ReceivingStarted,
};
