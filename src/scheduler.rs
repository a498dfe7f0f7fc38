//! The task scheduler: lifecycle, submission, dispatch and waiting.
//!
//! The scheduler owns one [`MultiReadPipe`] per worker. Submitting a task set
//! partitions it into work items pushed onto the submitting thread's own
//! pipe; workers drain their own pipe front-first and steal from peers'
//! backs. Waiting threads participate in dispatch instead of blocking, so
//! the submitting thread is never idle while work exists.

use crate::event::SignalEvent;
#[cfg(feature = "metrics")]
use crate::metrics::SchedulerMetrics;
use crate::pipe::MultiReadPipe;
use crate::task::{TaskSet, WorkItem};
use crate::worker::{self, current_worker_id};
use crossbeam_utils::{Backoff, CachePadded};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Slots per worker pipe. Ample headroom for a frame's worth of partitions;
/// overflow degrades to inline execution on the submitter, never to an error.
pub(crate) const PIPE_CAPACITY: usize = 256;

/// Shared state reachable from every worker and from the public facade.
pub(crate) struct SchedulerCore {
    /// One pipe per worker; worker `i` is the sole front-side user of
    /// `pipes[i]`. Padded so neighbouring pipes' cursors don't false-share.
    pipes: Box<[CachePadded<MultiReadPipe<WorkItem>>]>,
    num_threads: u32,
    /// Target partition count per submission: roughly `num_threads - 1`
    /// chunks per worker, leaving surplus for thieves.
    num_partitions: u32,
    running: AtomicBool,
    /// Live pool workers, excluding the creating thread.
    threads_running: AtomicU32,
    /// Partitions published but not yet finished, across all task sets.
    in_flight: AtomicU32,
    new_task_event: SignalEvent,
    #[cfg(feature = "metrics")]
    metrics: SchedulerMetrics,
}

impl SchedulerCore {
    fn new(num_threads: u32) -> Self {
        let pipes = (0..num_threads)
            .map(|_| CachePadded::new(MultiReadPipe::new(PIPE_CAPACITY)))
            .collect();
        SchedulerCore {
            pipes,
            num_threads,
            // `n * (n - 1)` targets the stealing headroom; clamped so a
            // single-thread pool still partitions into one item.
            num_partitions: (num_threads * (num_threads - 1)).max(1),
            running: AtomicBool::new(true),
            threads_running: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            new_task_event: SignalEvent::new(),
            #[cfg(feature = "metrics")]
            metrics: SchedulerMetrics::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn wait_for_kick(&self) {
        self.new_task_event.wait();
        #[cfg(feature = "metrics")]
        self.metrics.record_wakeup();
    }

    pub(crate) fn worker_exited(&self) {
        self.threads_running.fetch_sub(1, Ordering::AcqRel);
    }

    /// One dispatch attempt: own pipe front-first, then round-robin stealing
    /// starting at the neighbour. Runs at most one partition.
    pub(crate) fn try_run_task(&self, worker_id: u32) -> bool {
        debug_assert!(worker_id < self.num_threads, "worker id out of range");
        let mut item = self.pipes[worker_id as usize].writer_try_pop_front();
        #[cfg(feature = "metrics")]
        if item.is_some() {
            self.metrics.record_own_pop();
        }
        if item.is_none() {
            for offset in 1..self.num_threads {
                let other = (worker_id + offset) % self.num_threads;
                if let Some(stolen) = self.pipes[other as usize].reader_try_pop_back() {
                    #[cfg(feature = "metrics")]
                    self.metrics.record_steal();
                    item = Some(stolen);
                    break;
                }
            }
        }
        match item {
            Some(item) => {
                self.run_item(item, worker_id);
                true
            }
            None => false,
        }
    }

    /// Executes one partition and retires it.
    ///
    /// The completion decrement is a release, so a waiter acquiring zero
    /// observes every side effect of the execution.
    fn run_item(&self, item: WorkItem, worker_id: u32) {
        let range = item.range();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            item.task_set.execute_range(range.clone(), worker_id);
        }));
        if result.is_err() {
            // The contract forbids panicking tasks; contain the violation
            // rather than losing the worker and wedging every waiter.
            error!(
                "task set panicked executing [{}, {}) on worker {worker_id}",
                range.start, range.end
            );
        }
        item.task_set.completion().decrement();
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// A fixed pool of worker threads dispatching range-parallel task sets.
///
/// The creating thread counts as worker 0 and participates in dispatch
/// whenever it waits. Submission and waiting must happen on the creating
/// thread or inside [`execute_range`](TaskSet::execute_range): worker
/// identity is thread-local, and each pipe tolerates only one front-side
/// user.
///
/// ```no_run
/// use std::sync::Arc;
/// use taskpipe::{ClosureTaskSet, TaskScheduler};
///
/// # let image_rows = 1080;
/// let scheduler = TaskScheduler::new(4);
/// let blur = Arc::new(ClosureTaskSet::new(image_rows, |rows, _worker| {
///     for _row in rows {
///         // process one row
///     }
/// }));
/// scheduler.add_task_set(blur.clone());
/// scheduler.wait_for_task_set(blur.as_ref());
/// ```
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    threads: Vec<JoinHandle<()>>,
    pin_workers: bool,
}

impl TaskScheduler {
    /// Creates a scheduler with `num_threads` workers (clamped to at least
    /// one), counting the calling thread as worker 0. `num_threads - 1` pool
    /// threads are spawned.
    pub fn new(num_threads: u32) -> Self {
        Self::with_options(num_threads, false)
    }

    /// Like [`new`](Self::new), with each pool worker pinned to a CPU core
    /// (linear mapping) for cache locality.
    pub fn new_pinned(num_threads: u32) -> Self {
        Self::with_options(num_threads, true)
    }

    /// Creates a scheduler with one worker per hardware thread.
    pub fn with_hardware_threads() -> Self {
        Self::new(hardware_threads())
    }

    fn with_options(num_threads: u32, pin_workers: bool) -> Self {
        let (core, threads) = Self::start_threads(num_threads, pin_workers);
        TaskScheduler {
            core,
            threads,
            pin_workers,
        }
    }

    fn start_threads(num_threads: u32, pin_workers: bool) -> (Arc<SchedulerCore>, Vec<JoinHandle<()>>) {
        let num_threads = num_threads.max(1);
        let core = Arc::new(SchedulerCore::new(num_threads));
        let core_ids = if pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let mut threads = Vec::with_capacity(num_threads as usize - 1);
        for worker_id in 1..num_threads {
            core.threads_running.fetch_add(1, Ordering::Relaxed);
            let worker_core = Arc::clone(&core);
            let core_id = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[worker_id as usize % core_ids.len()])
            };
            let handle = thread::Builder::new()
                .name(format!("taskpipe-worker-{worker_id}"))
                .spawn(move || worker::worker_main(worker_core, worker_id, core_id))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        debug!("scheduler started with {num_threads} task threads");
        (core, threads)
    }

    /// Stops any existing pool, then starts a new one of `num_threads`.
    ///
    /// Usable after [`shutdown`](Self::shutdown) to bring the scheduler back
    /// up, possibly at a different size.
    pub fn initialize(&mut self, num_threads: u32) {
        self.shutdown();
        let (core, threads) = Self::start_threads(num_threads, self.pin_workers);
        self.core = core;
        self.threads = threads;
    }

    /// Number of task threads, including the calling thread as worker 0.
    pub fn num_task_threads(&self) -> u32 {
        self.core.num_threads
    }

    /// Partitions a task set and enqueues it on the submitting thread's pipe.
    ///
    /// Splits `[0, size)` into chunks of `max(1, size / num_partitions)`
    /// elements. Each partition's completion increment happens before the
    /// item is published, so no observer can see the set as complete while
    /// items remain. When the pipe fills, overflow partitions run inline on
    /// the submitting thread; overflow is a throughput event, not an error.
    ///
    /// A size-0 set publishes nothing and is immediately complete. The same
    /// set must not be re-submitted while still running.
    pub fn add_task_set(&self, task_set: Arc<dyn TaskSet>) {
        let core = &*self.core;
        debug_assert!(
            task_set.completion().is_complete(),
            "task set re-submitted while still running"
        );
        task_set.completion().reset();

        let size = task_set.size();
        let chunk = (size / core.num_partitions).max(1);
        let worker_id = current_worker_id();
        debug_assert!(worker_id < core.num_threads, "submitted from a foreign worker");
        let pipe = &core.pipes[worker_id as usize];

        let mut start = 0u32;
        while start < size {
            let end = size.min(start.saturating_add(chunk));
            // Publish order is load-bearing: the increment precedes the
            // release that makes the item visible, so a thief that acquires
            // the item also observes the increment.
            task_set.completion().increment();
            core.in_flight.fetch_add(1, Ordering::Relaxed);
            let item = WorkItem {
                task_set: Arc::clone(&task_set),
                start,
                end,
            };
            if let Err(item) = pipe.writer_try_push_front(item) {
                // Pipe full: kick a worker to start draining, run this
                // partition here. The pre-increment keeps the counter away
                // from zero while the item exists.
                core.new_task_event.signal();
                #[cfg(feature = "metrics")]
                core.metrics.record_inline_run();
                core.run_item(item, worker_id);
            }
            start = end;
        }
        core.new_task_event.signal();
    }

    /// Cooperatively waits until every partition of `task_set` has finished.
    ///
    /// The waiter executes ready items (its own pipe first, then steals)
    /// instead of blocking, so a wait nested inside
    /// [`execute_range`](TaskSet::execute_range) makes progress rather than
    /// deadlocking. Idle iterations back off with a bounded snooze.
    pub fn wait_for_task_set(&self, task_set: &dyn TaskSet) {
        let worker_id = current_worker_id();
        let completion = task_set.completion();
        let mut backoff = Backoff::new();
        while !completion.is_complete() {
            if self.core.try_run_task(worker_id) {
                backoff = Backoff::new();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Runs at most one ready item on the calling thread.
    ///
    /// A yield hint: lets a thread donate one slice of work without
    /// committing to a wait. Returns whether an item ran.
    pub fn try_run_task(&self) -> bool {
        self.core.try_run_task(current_worker_id())
    }

    /// Executes items until every pipe observes empty.
    ///
    /// This is the pipe-emptiness definition: items already popped but still
    /// executing on other workers are not waited for. Use
    /// [`wait_for_all_complete`](Self::wait_for_all_complete) when the
    /// stronger guarantee is needed.
    pub fn wait_for_all(&self) {
        let worker_id = current_worker_id();
        let mut backoff = Backoff::new();
        loop {
            if self.core.try_run_task(worker_id) {
                backoff = Backoff::new();
                continue;
            }
            if self.core.pipes.iter().all(|pipe| pipe.is_empty()) {
                return;
            }
            backoff.snooze();
        }
    }

    /// Executes items until every published partition has finished,
    /// including partitions running on other workers.
    pub fn wait_for_all_complete(&self) {
        let worker_id = current_worker_id();
        let mut backoff = Backoff::new();
        while self.core.in_flight.load(Ordering::Acquire) != 0 {
            if self.core.try_run_task(worker_id) {
                backoff = Backoff::new();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Drains all pipes, then stops the pool.
    pub fn wait_for_all_and_shutdown(&mut self) {
        self.wait_for_all();
        self.shutdown();
    }

    /// Stops and joins every pool worker. In-flight `execute_range` calls
    /// run to completion; the stop flag is only observed between items.
    ///
    /// Idempotent; the scheduler can be restarted afterwards with
    /// [`initialize`](Self::initialize).
    pub fn shutdown(&mut self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Keep kicking the event so parked workers observe the stop flag.
        while self.core.threads_running.load(Ordering::Acquire) > 0 {
            self.core.new_task_event.signal();
            thread::yield_now();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        debug!("scheduler stopped");
    }

    /// Dispatch counters. Compiled in only with the `metrics` feature.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.core.metrics
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::with_hardware_threads()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn hardware_threads() -> u32 {
    thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ClosureTaskSet;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_scheduler_thread_count() {
        let scheduler = TaskScheduler::new(4);
        assert_eq!(scheduler.num_task_threads(), 4);
    }

    #[test]
    fn test_thread_count_clamped_to_one() {
        let scheduler = TaskScheduler::new(0);
        assert_eq!(scheduler.num_task_threads(), 1);
    }

    #[test]
    fn test_parallel_sum() {
        let scheduler = TaskScheduler::new(4);
        let total = Arc::new(AtomicU64::new(0));
        let set = {
            let total = Arc::clone(&total);
            Arc::new(ClosureTaskSet::new(10_000, move |range, _worker_id| {
                let partial: u64 = range.map(u64::from).sum();
                total.fetch_add(partial, Ordering::Relaxed);
            }))
        };

        scheduler.add_task_set(set.clone());
        scheduler.wait_for_task_set(set.as_ref());

        assert!(set.completion().is_complete());
        assert_eq!(total.load(Ordering::Relaxed), 9_999 * 10_000 / 2);
    }

    #[test]
    fn test_single_thread_runs_on_waiter() {
        // No pool threads: every partition must run on the waiting thread.
        let scheduler = TaskScheduler::new(1);
        let hits = Arc::new(AtomicU32::new(0));
        let set = {
            let hits = Arc::clone(&hits);
            Arc::new(ClosureTaskSet::new(64, move |range, worker_id| {
                assert_eq!(worker_id, 0);
                hits.fetch_add(range.end - range.start, Ordering::Relaxed);
            }))
        };

        scheduler.add_task_set(set.clone());
        scheduler.wait_for_task_set(set.as_ref());

        assert_eq!(hits.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn test_try_run_task_is_single_step() {
        let scheduler = TaskScheduler::new(1);
        let hits = Arc::new(AtomicU32::new(0));
        let set = {
            let hits = Arc::clone(&hits);
            Arc::new(ClosureTaskSet::new(1, move |_range, _worker_id| {
                hits.fetch_add(1, Ordering::Relaxed);
            }))
        };

        scheduler.add_task_set(set.clone());
        assert!(scheduler.try_run_task());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(!scheduler.try_run_task());
    }
}
