//! Sync counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the synchronizer
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Completed reconciliation cycles
    pub cycles_total: AtomicU64,
    /// Peer requests that failed or timed out
    pub peer_failures_total: AtomicU64,
    /// Ledger records received from the authority or peers
    pub ledger_records_total: AtomicU64,
    /// Trees fetched because this replica had never seen them
    pub trees_fetched_total: AtomicU64,
    /// Head updates that added changes to known trees
    pub head_updates_applied_total: AtomicU64,
    /// Trees rejected by validation
    pub invalid_trees_total: AtomicU64,
    /// Batches refused for trees already held
    pub rejected_changes_total: AtomicU64,
    /// Head updates pushed to peers
    pub head_updates_sent_total: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Completed reconciliation cycles
    pub cycles_total: u64,
    /// Peer requests that failed or timed out
    pub peer_failures_total: u64,
    /// Ledger records received
    pub ledger_records_total: u64,
    /// Trees fetched
    pub trees_fetched_total: u64,
    /// Head updates applied
    pub head_updates_applied_total: u64,
    /// Trees rejected by validation
    pub invalid_trees_total: u64,
    /// Batches refused for trees already held
    pub rejected_changes_total: u64,
    /// Head updates pushed
    pub head_updates_sent_total: u64,
}

impl SyncMetrics {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Read every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            peer_failures_total: self.peer_failures_total.load(Ordering::Relaxed),
            ledger_records_total: self.ledger_records_total.load(Ordering::Relaxed),
            trees_fetched_total: self.trees_fetched_total.load(Ordering::Relaxed),
            head_updates_applied_total: self.head_updates_applied_total.load(Ordering::Relaxed),
            invalid_trees_total: self.invalid_trees_total.load(Ordering::Relaxed),
            rejected_changes_total: self.rejected_changes_total.load(Ordering::Relaxed),
            head_updates_sent_total: self.head_updates_sent_total.load(Ordering::Relaxed),
        }
    }
}
