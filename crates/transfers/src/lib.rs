//! Stock transfers between two locations (event-sourced).
//!
//! Stock does not move when a transfer is validated or shipped. It moves once, at
//! receipt: the sent quantity leaves the source and the received quantity enters
//! the destination. Any gap between the two stays visible in the ledger.

pub mod transfer;

pub use transfer::{
    AddTransferLine, CancelTransfer, CreateTransfer, RECEIVE, ReceiveTransfer, ReceivedLine,
    ShipTransfer, Transfer, TransferCancelled, TransferCommand, TransferCreated, TransferEvent,
    TransferId, TransferLine, TransferLineAdded, TransferReceived, TransferShipped,
    TransferStatus, TransferValidated, ValidateTransfer,
};
