//! Wake event used to park and kick idle workers.

use std::sync::{Condvar, Mutex};

struct EventState {
    /// Wake tokens not yet consumed by a waiter.
    pending: u32,
    /// Threads currently parked in [`SignalEvent::wait`].
    waiters: u32,
}

/// Kick primitive for parked workers, built on a mutex and condvar.
///
/// A signal wakes every currently parked waiter; with no waiter parked it
/// leaves one sticky token behind, so a signal that races ahead of a wait is
/// not lost: the next [`wait`](SignalEvent::wait) consumes the token and
/// returns immediately. This is what makes the submit path's "push items,
/// then signal" sequence safe against lost wakeups.
///
/// The mutex guards only the token bookkeeping; it is never held while work
/// runs, so the scheduler's hot path stays lock-free.
pub(crate) struct SignalEvent {
    state: Mutex<EventState>,
    condvar: Condvar,
}

impl SignalEvent {
    pub(crate) fn new() -> Self {
        SignalEvent {
            state: Mutex::new(EventState {
                pending: 0,
                waiters: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Wakes every parked waiter, or arms one sticky token if none is parked.
    pub(crate) fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = state.pending.max(state.waiters).max(1);
        drop(state);
        self.condvar.notify_all();
    }

    /// Blocks until a wake token is available, then consumes one.
    pub(crate) fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiters += 1;
        while state.pending == 0 {
            state = self.condvar.wait(state).unwrap();
        }
        state.pending -= 1;
        state.waiters -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait_is_sticky() {
        let event = SignalEvent::new();
        event.signal();
        // Must return immediately rather than block.
        event.wait();
    }

    #[test]
    fn test_signal_wakes_every_parked_waiter() {
        let event = Arc::new(SignalEvent::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait())
            })
            .collect();
        // Wait until every waiter has parked, then release all with one signal.
        while event.state.lock().unwrap().waiters < 4 {
            thread::sleep(Duration::from_millis(1));
        }
        event.signal();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}
