// Lock observability
// Counters and histograms through the metrics facade, plus a steal tracker
// that flags a lease token captured by more than one steal

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::warn;

pub const ACQUIRE_TOTAL: &str = "keylock_acquire_total";
pub const ACQUIRE_WAIT_SECONDS: &str = "keylock_acquire_wait_seconds";
pub const STEAL_TOTAL: &str = "keylock_steal_total";
pub const RELEASE_TOTAL: &str = "keylock_release_total";

/// Register metric descriptions
/// Call once at startup, after installing a recorder
pub fn describe_metrics() {
    describe_counter!(
        ACQUIRE_TOTAL,
        "Total lock acquisitions by outcome (acquired, timeout, aborted, error)"
    );
    describe_histogram!(
        ACQUIRE_WAIT_SECONDS,
        "Time spent in acquire before it returned, in seconds"
    );
    describe_counter!(STEAL_TOTAL, "Steal attempts on expired leases by outcome");
    describe_counter!(
        RELEASE_TOTAL,
        "Total lock releases by outcome (released, lost, not_held)"
    );
}

pub(crate) fn record_acquire(outcome: &'static str, waited: Duration) {
    counter!(ACQUIRE_TOTAL, "outcome" => outcome).increment(1);
    histogram!(ACQUIRE_WAIT_SECONDS).record(waited.as_secs_f64());
}

pub(crate) fn record_steal(outcome: &'static str) {
    counter!(STEAL_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn record_release(outcome: &'static str) {
    counter!(RELEASE_TOTAL, "outcome" => outcome).increment(1);
}

/// Counts how many winning steals captured each expired token
///
/// Share one tracker between clients with `Arc`. Under a correct store every
/// count stays at 1; a higher count means two clients both believed they
/// won the same steal.
#[derive(Debug, Default)]
pub struct ContentionTracker {
    steals: DashMap<String, u64>,
}

impl ContentionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record a winning steal of `overwritten`, returning its new count
    pub fn record_steal(&self, key: &str, overwritten: &str) -> u64 {
        let count = {
            let mut entry = self.steals.entry(overwritten.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if count > 1 {
            warn!(
                key = %key,
                token = %overwritten,
                count,
                "Lease token captured by more than one steal"
            );
        }
        count
    }

    /// Number of winning steals recorded for `token`
    pub fn steals_of(&self, token: &str) -> u64 {
        self.steals.get(token).map(|c| *c).unwrap_or(0)
    }

    /// Tokens captured by more than one steal
    pub fn duplicates(&self) -> Vec<(String, u64)> {
        self.steals
            .iter()
            .filter(|entry| *entry.value() > 1)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Total winning steals recorded
    pub fn total(&self) -> u64 {
        self.steals.iter().map(|entry| *entry.value()).sum()
    }

    pub fn clear(&self) {
        self.steals.clear();
    }
}
