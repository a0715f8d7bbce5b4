//! Per-identity usage accounting
//!
//! Sessions report the byte length of every inbound message as a delta; the
//! table sums them per identity for reporting. Increments commute, so one
//! mutex around the map is enough.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::identity::Identity;

/// Shared identity → received-bytes table
#[derive(Debug, Clone, Default)]
pub struct UsageTable {
    inner: Arc<Mutex<HashMap<Identity, u64>>>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, u64>> {
        // The map holds plain counters, a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `delta` bytes to `identity` and return its new total
    pub fn record(&self, identity: &Identity, delta: u64) -> u64 {
        let mut map = self.lock();
        let total = map.entry(identity.clone()).or_insert(0);
        *total += delta;
        *total
    }

    pub fn total(&self, identity: &Identity) -> u64 {
        self.lock().get(identity).copied().unwrap_or(0)
    }

    /// All identities with their totals, sorted by identity
    pub fn snapshot(&self) -> Vec<(Identity, u64)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, bytes)| (id.clone(), *bytes))
            .collect();
        entries.sort();
        entries
    }
}

/// Format a byte count as kilobytes with two decimals
pub fn kilobytes(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / 1024.0)
}
