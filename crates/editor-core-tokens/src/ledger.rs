//! Pending change ledger.
//!
//! Document changes are recorded here until a worker result proves the worker has seen them.

use crate::array_edit::CompositeArrayEdit;
use std::collections::VecDeque;

/// A document change, in structural form, not yet known to be incorporated by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Document version produced by this change.
    pub version: u64,
    /// Line edits of the change, applied in order.
    pub line_edits: Vec<CompositeArrayEdit>,
}

impl PendingChange {
    /// Create a new pending change.
    pub fn new(version: u64, line_edits: Vec<CompositeArrayEdit>) -> Self {
        Self {
            version,
            line_edits,
        }
    }
}

/// Ordered queue of [`PendingChange`]s.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    pending: VecDeque<PendingChange>,
}

impl ChangeLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change. Versions must be strictly increasing.
    pub fn push(&mut self, change: PendingChange) {
        debug_assert!(
            self.latest_version().is_none_or(|latest| latest < change.version),
            "ledger versions must increase: {:?} then {}",
            self.latest_version(),
            change.version
        );
        self.pending.push_back(change);
    }

    /// Remove and return, in order, every change with a version `<= version`.
    pub fn retire_up_to(&mut self, version: u64) -> Vec<PendingChange> {
        let count = self
            .pending
            .iter()
            .take_while(|change| change.version <= version)
            .count();
        self.pending.drain(..count).collect()
    }

    /// Changes still pending, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.pending.iter()
    }

    /// Every pending line edit, in application order.
    pub fn line_edits(&self) -> impl Iterator<Item = &CompositeArrayEdit> {
        self.pending.iter().flat_map(|change| change.line_edits.iter())
    }

    /// Version of the newest pending change.
    pub fn latest_version(&self) -> Option<u64> {
        self.pending.back().map(|change| change.version)
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
