use std::sync::atomic::{AtomicU64, Ordering};

/// Optional dispatch counters for the scheduler.
///
/// All increments are relaxed; the numbers are diagnostics, not
/// synchronization. Compiled in only with the `metrics` feature.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Partitions a worker popped from its own pipe.
    own_pops: AtomicU64,
    /// Partitions stolen from another worker's pipe.
    steals: AtomicU64,
    /// Partitions executed inline on the submitter because its pipe was full.
    inline_runs: AtomicU64,
    /// Times a parked worker was woken by the task event.
    wakeups: AtomicU64,
}

impl SchedulerMetrics {
    pub(crate) fn new() -> Self {
        SchedulerMetrics::default()
    }

    pub(crate) fn record_own_pop(&self) {
        self.own_pops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inline_run(&self) {
        self.inline_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Partitions run from the executing worker's own pipe.
    pub fn own_pops(&self) -> u64 {
        self.own_pops.load(Ordering::Relaxed)
    }

    /// Partitions stolen from peers.
    pub fn steals(&self) -> u64 {
        self.steals.load(Ordering::Relaxed)
    }

    /// Partitions the submitter ran inline on pipe overflow.
    pub fn inline_runs(&self) -> u64 {
        self.inline_runs.load(Ordering::Relaxed)
    }

    /// Event wakeups of parked workers.
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// Total partitions executed through the dispatch paths.
    pub fn items_run(&self) -> u64 {
        self.own_pops() + self.steals() + self.inline_runs()
    }
}
