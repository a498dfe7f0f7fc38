//! # taskpipe - Work-Stealing Scheduler for Range-Parallel Task Sets
//!
//! A small, embeddable scheduler that distributes a range-indexed unit of
//! work across a fixed pool of worker threads. Built for interactive and
//! soft-real-time loops (game frames, simulation steps) where task sets are
//! submitted, executed and awaited within the same frame and the dominant
//! cost to avoid is lock contention on dispatch.
//!
//! ## Architecture
//!
//! - **Pipes**: each worker owns a fixed-capacity lock-less ring
//!   ([`pipe::MultiReadPipe`]). The owner pushes and pops at the front
//!   (LIFO, cache-warm); any other worker steals from the back (FIFO).
//! - **Task sets**: the caller implements [`TaskSet`], a size plus an
//!   `execute_range(range, worker_id)` callback invoked concurrently on
//!   disjoint sub-ranges. Completion is tracked by a counter embedded in the
//!   set itself.
//! - **Dispatch**: workers drain their own pipe, then steal round-robin from
//!   peers; idle workers spin briefly, then park on a wake event.
//! - **Cooperative waiting**: a waiting thread becomes a worker, executing
//!   ready items until its target completes. The submitting thread counts as
//!   worker 0, so waits nested inside task execution make progress instead
//!   of deadlocking.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskpipe::{ClosureTaskSet, TaskScheduler};
//!
//! let scheduler = TaskScheduler::new(4);
//!
//! let work = Arc::new(ClosureTaskSet::new(1 << 16, |range, _worker_id| {
//!     for _index in range {
//!         // process one element
//!     }
//! }));
//!
//! scheduler.add_task_set(work.clone());
//! scheduler.wait_for_task_set(work.as_ref());
//! ```

pub mod counter;
mod event;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pipe;
pub mod scheduler;
pub mod task;
mod worker;

pub use counter::Completion;
pub use scheduler::TaskScheduler;
pub use task::{ClosureTaskSet, TaskSet};
