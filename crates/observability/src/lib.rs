//! Process-wide tracing setup shared by binaries and tests.

/// Initialize process-wide observability (JSON logs filtered by `RUST_LOG`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use tracing::{DEFAULT_FILTER, init_for_tests};
