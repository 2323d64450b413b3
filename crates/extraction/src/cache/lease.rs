//! Leases on cached runs.

use std::ops::Deref;
use std::sync::Arc;

use super::entry::RunEntry;

/// A held reference to a Ready run.
///
/// While any lease is alive the entry stays usable, even after the cache
/// has evicted it; new requests for the same run then populate a fresh
/// entry. The evicted entry's memory is released when its last lease drops.
#[derive(Debug, Clone)]
pub struct RunLease {
    entry: Arc<RunEntry>,
}

impl RunLease {
    pub(crate) fn new(entry: Arc<RunEntry>) -> Self {
        Self { entry }
    }

    /// Whether two leases refer to the same populated entry.
    pub fn same_entry(&self, other: &RunLease) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Deref for RunLease {
    type Target = RunEntry;

    fn deref(&self) -> &RunEntry {
        &self.entry
    }
}
