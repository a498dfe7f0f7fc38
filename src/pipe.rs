//! Lock-less bounded pipe with one writer and many stealing readers.
//!
//! Each worker owns one pipe. The owner pushes new work at the front and pops
//! from the front (LIFO keeps it on its freshest, cache-warm items); any other
//! thread steals from the back (FIFO exposes the oldest items to thieves).
//! All cross-thread arbitration happens on per-slot state words, never a lock.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

/// Slot is reusable.
const EMPTY: u32 = 0;
/// The writer is storing a payload into the slot.
const WRITING: u32 = 1;
/// The slot holds a payload ready to be consumed.
const FULL: u32 = 2;
/// A consumer won the slot and is moving the payload out.
const READING: u32 = 3;

struct Slot<T> {
    state: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A fixed-capacity ring supporting single-writer front access and
/// multi-reader back stealing, without locks.
///
/// Two 32-bit wrapping cursors delimit the live region: `read` (advanced by
/// thieves) chases `write` (advanced and retreated by the owner). A slot's
/// state word moves through `EMPTY -> WRITING -> FULL -> READING -> EMPTY`;
/// the compare-and-swap into `READING` is what guarantees a payload is
/// consumed exactly once, no matter how front pops and back pops race.
///
/// Capacity is a power of two. Occupancy checks use wrapping subtraction, so
/// cursor wrap-around at `u32::MAX` is handled uniformly.
///
/// # Owner contract
///
/// `writer_try_push_front` and `writer_try_pop_front` must only be called
/// from the thread that owns the pipe. `reader_try_pop_back` and `is_empty`
/// may be called from any thread.
///
/// # Observability
///
/// Emptiness and fullness are best-effort: a thief that has claimed the last
/// slot but not yet released it makes the pipe look transiently full to the
/// writer, and a freshly pushed item may not be visible to a thief for a few
/// cycles. Both resolve without intervention; callers treat a failed
/// operation as "retry later", never as an error.
pub struct MultiReadPipe<T> {
    slots: Box<[Slot<T>]>,
    mask: u32,
    /// Owner-advanced write cursor, published with release so readers can
    /// bound the live region.
    write: CachePadded<AtomicU32>,
    /// Shared read cursor, advanced by whichever thief claims the slot at it.
    read: CachePadded<AtomicU32>,
}

// SAFETY: payloads are moved across threads through the pipe but never
// aliased: the slot-state CAS hands each payload to exactly one consumer, and
// the cursors are plain atomics. `T: Send` is therefore sufficient; no `&T`
// is ever shared between threads.
unsafe impl<T: Send> Send for MultiReadPipe<T> {}
// SAFETY: see `Send` above; all shared mutation goes through atomics and the
// per-slot exclusive-claim protocol.
unsafe impl<T: Send> Sync for MultiReadPipe<T> {}

impl<T> MultiReadPipe<T> {
    /// Creates a pipe with the given capacity, which must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "pipe capacity must be a power of two >= 2"
        );
        assert!(capacity <= 1 << 16, "pipe capacity too large for 32-bit cursors");
        let slots = (0..capacity)
            .map(|_| Slot {
                state: AtomicU32::new(EMPTY),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        MultiReadPipe {
            slots,
            mask: capacity as u32 - 1,
            write: CachePadded::new(AtomicU32::new(0)),
            read: CachePadded::new(AtomicU32::new(0)),
        }
    }

    #[inline]
    fn slot(&self, cursor: u32) -> &Slot<T> {
        &self.slots[(cursor & self.mask) as usize]
    }

    /// Pushes a value at the front. Owner only.
    ///
    /// Fails and hands the value back when the target slot is not reusable:
    /// either the pipe genuinely holds `capacity` items, or a thief is still
    /// draining the slot from a full lap ago (a transient full that clears on
    /// its own).
    pub fn writer_try_push_front(&self, value: T) -> Result<(), T> {
        let write = self.write.load(Ordering::Relaxed);
        let slot = self.slot(write);
        if slot
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY: the CAS into WRITING grants exclusive access to the slot
        // payload; no consumer touches it until the FULL store below.
        unsafe {
            (*slot.value.get()).write(value);
        }
        // Release publishes the payload (and everything sequenced before this
        // push, such as the completion pre-increment) to the consumer that
        // acquires the slot.
        slot.state.store(FULL, Ordering::Release);
        self.write.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed item. Owner only.
    ///
    /// Returns `None` when the pipe is empty or a thief claimed the newest
    /// item; since thieves consume oldest-first, a claimed newest item means
    /// the pipe has drained past the owner.
    pub fn writer_try_pop_front(&self) -> Option<T> {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let front = write.wrapping_sub(1);
        let slot = self.slot(front);
        if slot
            .state
            .compare_exchange(FULL, READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // SAFETY: winning the FULL -> READING CAS grants exclusive access to
        // the initialized payload.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        // Release so the payload move-out cannot be reordered past slot
        // re-use by the next push.
        slot.state.store(EMPTY, Ordering::Release);
        self.write.store(front, Ordering::Release);
        Some(value)
    }

    /// Pops the oldest available item. Any thread.
    pub fn reader_try_pop_back(&self) -> Option<T> {
        let mut read = self.read.load(Ordering::Acquire);
        loop {
            let write = self.write.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            let slot = self.slot(read);
            if slot
                .state
                .compare_exchange(FULL, READING, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // Advance the shared cursor past the claimed slot before
                // touching the payload, so other thieves can proceed to the
                // next item. The compare-exchange also rejects a stale claim:
                // if the cursor moved while this thread was preempted, the
                // claimed payload belongs to a later lap and must be handed
                // back untouched.
                if self
                    .read
                    .compare_exchange(
                        read,
                        read.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    slot.state.store(FULL, Ordering::Release);
                    read = self.read.load(Ordering::Acquire);
                    continue;
                }
                // SAFETY: winning the FULL -> READING CAS grants exclusive
                // access to the initialized payload.
                let value = unsafe { (*slot.value.get()).assume_init_read() };
                slot.state.store(EMPTY, Ordering::Release);
                return Some(value);
            }
            // Lost the slot to the owner or to another thief. Retry only if
            // the cursor made progress; otherwise report empty and let the
            // caller move on to the next pipe.
            let current = self.read.load(Ordering::Acquire);
            if current == read {
                return None;
            }
            read = current;
        }
    }

    /// Best-effort emptiness observation for the wait protocol.
    ///
    /// Says nothing about items already popped but still executing.
    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }
}

impl<T> Drop for MultiReadPipe<T> {
    fn drop(&mut self) {
        // Front-popping until empty visits every live slot; `&mut self`
        // guarantees no concurrent access remains.
        while self.writer_try_pop_front().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_front_pop_is_lifo() {
        let pipe = MultiReadPipe::new(8);
        for i in 0..4 {
            pipe.writer_try_push_front(i).unwrap();
        }
        assert_eq!(pipe.writer_try_pop_front(), Some(3));
        assert_eq!(pipe.writer_try_pop_front(), Some(2));
        assert_eq!(pipe.writer_try_pop_front(), Some(1));
        assert_eq!(pipe.writer_try_pop_front(), Some(0));
        assert_eq!(pipe.writer_try_pop_front(), None);
    }

    #[test]
    fn test_back_pop_is_fifo() {
        let pipe = MultiReadPipe::new(8);
        for i in 0..4 {
            pipe.writer_try_push_front(i).unwrap();
        }
        assert_eq!(pipe.reader_try_pop_back(), Some(0));
        assert_eq!(pipe.reader_try_pop_back(), Some(1));
        assert_eq!(pipe.reader_try_pop_back(), Some(2));
        assert_eq!(pipe.reader_try_pop_back(), Some(3));
        assert_eq!(pipe.reader_try_pop_back(), None);
    }

    #[test]
    fn test_push_fails_when_full() {
        let pipe = MultiReadPipe::new(4);
        for i in 0..4 {
            pipe.writer_try_push_front(i).unwrap();
        }
        assert_eq!(pipe.writer_try_push_front(99), Err(99));
        // Draining one slot from the back frees the ring for one more push.
        assert_eq!(pipe.reader_try_pop_back(), Some(0));
        assert!(pipe.writer_try_push_front(4).is_ok());
        assert_eq!(pipe.writer_try_push_front(99), Err(99));
    }

    #[test]
    fn test_front_and_back_meet_in_the_middle() {
        let pipe = MultiReadPipe::new(8);
        for i in 0..5 {
            pipe.writer_try_push_front(i).unwrap();
        }
        assert_eq!(pipe.writer_try_pop_front(), Some(4));
        assert_eq!(pipe.reader_try_pop_back(), Some(0));
        assert_eq!(pipe.writer_try_pop_front(), Some(3));
        assert_eq!(pipe.reader_try_pop_back(), Some(1));
        assert_eq!(pipe.reader_try_pop_back(), Some(2));
        assert!(pipe.is_empty());
        assert_eq!(pipe.writer_try_pop_front(), None);
        assert_eq!(pipe.reader_try_pop_back(), None);
    }

    #[test]
    fn test_cursor_wrap_around() {
        // A tiny ring forces many laps; every value must come out exactly
        // once and in FIFO order from the back.
        let pipe = MultiReadPipe::new(4);
        let mut expected = 0;
        for i in 0..1000 {
            pipe.writer_try_push_front(i).unwrap();
            if i % 3 == 2 {
                for _ in 0..3 {
                    assert_eq!(pipe.reader_try_pop_back(), Some(expected));
                    expected += 1;
                }
            }
        }
        while let Some(value) = pipe.reader_try_pop_back() {
            assert_eq!(value, expected);
            expected += 1;
        }
        assert_eq!(expected, 1000);
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_drop_releases_remaining_items() {
        let tracker = Arc::new(());
        {
            let pipe = MultiReadPipe::new(8);
            for _ in 0..5 {
                pipe.writer_try_push_front(Arc::clone(&tracker)).unwrap();
            }
            assert_eq!(Arc::strong_count(&tracker), 6);
        }
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_empty_observation() {
        let pipe: MultiReadPipe<u32> = MultiReadPipe::new(8);
        assert!(pipe.is_empty());
        pipe.writer_try_push_front(7).unwrap();
        assert!(!pipe.is_empty());
        pipe.writer_try_pop_front().unwrap();
        assert!(pipe.is_empty());
    }
}
