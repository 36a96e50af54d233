//! Physical counts (event-sourced).
//!
//! A count snapshots the theoretical quantity of each counted item at one
//! location, collects the quantities actually found on the shelf, and on
//! finalisation brings the stock of every counted line to the counted quantity.

pub mod count;

pub use count::{
    CancelCount, CountCancelled, CountCommand, CountEvent, CountFinalized, CountId, CountLine,
    CountOpened, CountStatus, CountedQuantityRecorded, FINALIZE, FinalizeCount, OpenCount,
    RecordCountedQuantity, SnapshotLine, PhysicalCount,
};
