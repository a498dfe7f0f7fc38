//! Task set definitions.
//!
//! A task set is the caller-supplied unit of range-parallel work: a size `N`
//! and a callback the scheduler invokes concurrently on disjoint sub-ranges
//! of `[0, N)`.

use crate::counter::Completion;
use std::ops::Range;
use std::sync::Arc;

/// A range-parallel unit of work.
///
/// Implementors guarantee that [`execute_range`](TaskSet::execute_range) is
/// safe to invoke concurrently on disjoint ranges, that any shared state it
/// touches is synchronized by the caller, and that
/// [`size`](TaskSet::size) does not change while the set is submitted.
/// `execute_range` must not panic; a panic is contained (logged and counted
/// as completed) but the affected set's results are unspecified.
///
/// The completion counter is embedded in the set so the scheduler keeps no
/// per-submission state:
///
/// ```
/// use std::ops::Range;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use taskpipe::{Completion, TaskSet};
///
/// struct SumSet {
///     total: AtomicU64,
///     completion: Completion,
/// }
///
/// impl TaskSet for SumSet {
///     fn size(&self) -> u32 {
///         1000
///     }
///
///     fn execute_range(&self, range: Range<u32>, _worker_id: u32) {
///         let partial: u64 = range.map(u64::from).sum();
///         self.total.fetch_add(partial, Ordering::Relaxed);
///     }
///
///     fn completion(&self) -> &Completion {
///         &self.completion
///     }
/// }
/// ```
pub trait TaskSet: Send + Sync {
    /// Total number of indexable elements.
    fn size(&self) -> u32;

    /// Processes the half-open index range `[range.start, range.end)`.
    ///
    /// `worker_id` identifies the executing worker and lies in
    /// `[0, num_task_threads)`; the submitting thread is worker 0.
    fn execute_range(&self, range: Range<u32>, worker_id: u32);

    /// The set's completion counter. Implementors return a field.
    fn completion(&self) -> &Completion;
}

/// A task set built from a closure.
///
/// The parallel-work counterpart of constructing a job from a closure:
/// convenient for callers that don't want a named type per workload.
///
/// ```no_run
/// use std::sync::Arc;
/// use taskpipe::{ClosureTaskSet, TaskScheduler};
///
/// let scheduler = TaskScheduler::new(4);
/// let work = Arc::new(ClosureTaskSet::new(1024, |range, worker_id| {
///     for index in range {
///         let _ = (index, worker_id);
///     }
/// }));
/// scheduler.add_task_set(work.clone());
/// scheduler.wait_for_task_set(work.as_ref());
/// ```
pub struct ClosureTaskSet<F>
where
    F: Fn(Range<u32>, u32) + Send + Sync,
{
    size: u32,
    run: F,
    completion: Completion,
}

impl<F> ClosureTaskSet<F>
where
    F: Fn(Range<u32>, u32) + Send + Sync,
{
    /// Creates a task set of `size` elements executing `run` per range.
    pub fn new(size: u32, run: F) -> Self {
        ClosureTaskSet {
            size,
            run,
            completion: Completion::new(),
        }
    }
}

impl<F> TaskSet for ClosureTaskSet<F>
where
    F: Fn(Range<u32>, u32) + Send + Sync,
{
    fn size(&self) -> u32 {
        self.size
    }

    fn execute_range(&self, range: Range<u32>, worker_id: u32) {
        (self.run)(range, worker_id)
    }

    fn completion(&self) -> &Completion {
        &self.completion
    }
}

/// One partition of a submitted task set, scheduled as an atomic unit.
///
/// Value type flowing through the pipes. The `Arc` keeps the set alive until
/// its last partition has executed, which is what lets callers drop their
/// handle early without a use-after-free.
pub(crate) struct WorkItem {
    pub(crate) task_set: Arc<dyn TaskSet>,
    pub(crate) start: u32,
    pub(crate) end: u32,
}

impl WorkItem {
    pub(crate) fn range(&self) -> Range<u32> {
        self.start..self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_closure_task_set_executes_range() {
        let hits = AtomicU32::new(0);
        let set = ClosureTaskSet::new(10, |range, _worker_id| {
            hits.fetch_add(range.end - range.start, Ordering::Relaxed);
        });
        assert_eq!(set.size(), 10);
        set.execute_range(2..7, 0);
        assert_eq!(hits.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_work_item_range() {
        let set: Arc<dyn TaskSet> = Arc::new(ClosureTaskSet::new(8, |_range, _id| {}));
        let item = WorkItem {
            task_set: set,
            start: 3,
            end: 8,
        };
        assert_eq!(item.range(), 3..8);
    }
}
