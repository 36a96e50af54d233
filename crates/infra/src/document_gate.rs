//! Which documents currently permit which stock-affecting transition.
//!
//! Workflows keep the registry current after every document change; the engine
//! consults it before committing a batch so that a batch computed against a
//! stale document state is refused.

use std::collections::HashMap;

use parking_lot::RwLock;

use stockledger_inventory::{DocumentRef, IdempotencyKey};

pub trait DocumentGate: Send + Sync {
    fn permits(&self, key: &IdempotencyKey) -> bool;
}

#[derive(Debug, Default)]
pub struct DocumentRegistry {
    open: RwLock<HashMap<DocumentRef, &'static [&'static str]>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the transitions `document` permits. A document permitting none
    /// is dropped, since unknown documents are refused anyway.
    pub fn record(&self, document: DocumentRef, transitions: &'static [&'static str]) {
        let mut open = self.open.write();
        if transitions.is_empty() {
            open.remove(&document);
        } else {
            open.insert(document, transitions);
        }
    }
}

impl DocumentGate for DocumentRegistry {
    /// Manual batches are always permitted; unknown documents never are.
    fn permits(&self, key: &IdempotencyKey) -> bool {
        if key.document == DocumentRef::Manual {
            return true;
        }
        self.open
            .read()
            .get(&key.document)
            .is_some_and(|open| open.contains(&key.transition.as_str()))
    }
}
