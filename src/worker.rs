//! Worker thread entry point and thread-local worker identity.

use crate::scheduler::SchedulerCore;
use core_affinity::CoreId;
use log::trace;
use std::cell::Cell;
use std::hint;
use std::sync::Arc;

/// Consecutive empty dispatch attempts before a worker parks on the wake
/// event. Short idle gaps between frames are absorbed by spinning; longer
/// ones yield the CPU.
pub(crate) const SPIN_THRESHOLD: u32 = 100;

thread_local! {
    /// Worker identity of the current thread.
    ///
    /// Zero for any thread that never joined a pool, which is what makes the
    /// scheduler's creating thread worker 0.
    static WORKER_ID: Cell<u32> = const { Cell::new(0) };
}

pub(crate) fn current_worker_id() -> u32 {
    WORKER_ID.with(Cell::get)
}

/// Main loop of a pool worker: dispatch until the scheduler stops.
pub(crate) fn worker_main(core: Arc<SchedulerCore>, worker_id: u32, core_id: Option<CoreId>) {
    WORKER_ID.with(|id| id.set(worker_id));
    if let Some(core_id) = core_id {
        if !core_affinity::set_for_current(core_id) {
            trace!("worker {worker_id} could not be pinned to {core_id:?}");
        }
    }
    trace!("worker {worker_id} started");

    let mut spin_count = 0u32;
    while core.is_running() {
        if core.try_run_task(worker_id) {
            spin_count = 0;
        } else {
            spin_count += 1;
            if spin_count > SPIN_THRESHOLD {
                core.wait_for_kick();
                spin_count = 0;
            } else {
                hint::spin_loop();
            }
        }
    }

    trace!("worker {worker_id} stopping");
    core.worker_exited();
}
