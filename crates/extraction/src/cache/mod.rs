//! Run cache: Ready runs, leases and per-run field decoding.

mod entry;
mod lease;
mod run_cache;

pub use entry::{DecodedField, RunEntry};
pub use lease::RunLease;
pub use run_cache::{CacheStats, RunCache};
