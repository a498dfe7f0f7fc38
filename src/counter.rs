//! Completion counting for submitted task sets.
//!
//! Every task set embeds a [`Completion`]: the scheduler increments it once
//! per partition before the partition becomes visible to workers, and
//! decrements it after the partition has executed. Waiters observe zero to
//! know the whole set has finished.

use std::sync::atomic::{AtomicU32, Ordering};

/// Outstanding-partition counter embedded in a task set.
///
/// The counter lives inside the task set rather than the scheduler, so the
/// scheduler keeps no per-submission state. Implementors of
/// [`TaskSet`](crate::TaskSet) hold one by value and return it from
/// [`completion()`](crate::TaskSet::completion).
///
/// The increment is relaxed: it is ordered before the partition's publication
/// by the release store that makes the work item visible, so any worker that
/// acquires the item also observes the increment. The decrement is a release
/// so a waiter that acquires a zero count observes every side effect of every
/// `execute_range` call.
#[derive(Debug, Default)]
pub struct Completion {
    outstanding: AtomicU32,
}

impl Completion {
    /// Creates a counter with no outstanding partitions.
    pub fn new() -> Self {
        Completion {
            outstanding: AtomicU32::new(0),
        }
    }

    /// Records one more outstanding partition.
    pub(crate) fn increment(&self) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one partition as finished.
    pub(crate) fn decrement(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "completion counter underflow");
    }

    /// Number of partitions published but not yet finished.
    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Whether every published partition has finished.
    pub fn is_complete(&self) -> bool {
        self.outstanding() == 0
    }

    /// Clears the counter at submission time.
    ///
    /// A task set must not be re-submitted while still running; the scheduler
    /// debug-asserts this before resetting.
    pub(crate) fn reset(&self) {
        self.outstanding.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_starts_complete() {
        let completion = Completion::new();
        assert!(completion.is_complete());
        assert_eq!(completion.outstanding(), 0);
    }

    #[test]
    fn test_completion_balance() {
        let completion = Completion::new();
        completion.increment();
        completion.increment();
        assert_eq!(completion.outstanding(), 2);
        assert!(!completion.is_complete());

        completion.decrement();
        assert_eq!(completion.outstanding(), 1);

        completion.decrement();
        assert!(completion.is_complete());
    }

    #[test]
    fn test_completion_reset() {
        let completion = Completion::new();
        completion.increment();
        completion.reset();
        assert!(completion.is_complete());
    }
}
