pub mod engine;
pub mod errors;
pub mod identity;
pub mod loader;
pub mod policy;
pub mod reloader;
pub mod service;
pub mod session;
pub mod store;
pub mod types;
pub mod web;

use chrono::{DateTime, Utc};
use types::TupleIndex;

/// Fully compiled policy state as produced by one load.
/// Immutable after construction; a reload builds a new one and swaps it in.
#[derive(Debug)]
pub struct PolicySet {
    /// All policy tuples, indexed for forward and reverse lookup
    pub tuples: TupleIndex,
    /// Number of role records that contributed to this set
    pub roles: usize,
    /// Permission entries skipped by the compiler
    pub dropped_entries: usize,
    /// Role records that could not be decoded at all
    pub dropped_records: usize,
    pub loaded_at: DateTime<Utc>,
}

impl PolicySet {
    pub fn empty() -> Self {
        Self {
            tuples: TupleIndex::new(),
            roles: 0,
            dropped_entries: 0,
            dropped_records: 0,
            loaded_at: Utc::now(),
        }
    }
}
