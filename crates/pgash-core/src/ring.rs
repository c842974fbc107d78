//! Fixed-capacity circular history of samples.
//!
//! Single writer (the sampler), many readers. Each slot is guarded by its
//! own mutex held only for the duration of one record copy, so a reader
//! never observes a torn sample and the writer is never blocked for longer
//! than one copy. Capacity is fixed at initialization; changing it requires
//! a restart because the backing storage is sized once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::sample::Sample;

/// Locks a slot, recovering the guard if a previous holder panicked.
/// Slot contents are plain data and remain usable after a poison.
pub(crate) fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-capacity circular array of [`Sample`] records.
///
/// The write cursor advances `next = (next mod capacity) + 1`, so writes
/// distribute over `[0, capacity)` and eviction is FIFO-by-slot: once the
/// ring has wrapped, the slot overwritten is always the oldest-written one.
pub struct SessionHistoryRing {
    slots: Box<[Mutex<Sample>]>,
    /// Last logical insert position, 1-based; zero means nothing written.
    /// Advanced only by the sampler.
    inserted: AtomicUsize,
}

impl SessionHistoryRing {
    /// Allocates and zeroes a ring of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Mutex::new(Sample::unwritten()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            inserted: AtomicUsize::new(0),
        }
    }

    /// Number of slots. Immutable for the process lifetime.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Writes `sample` at the cursor, advances the cursor with wraparound
    /// and returns the slot index written. Never fails; whatever was in
    /// the slot is overwritten unconditionally.
    pub fn append(&self, sample: Sample) -> usize {
        let capacity = self.slots.len();
        let next = (self.inserted.load(Ordering::Relaxed) % capacity) + 1;
        self.inserted.store(next, Ordering::Relaxed);
        let index = next - 1;
        *lock(&self.slots[index]) = sample;
        index
    }

    /// Copies out all written slots in physical slot order, stopping at the
    /// first slot whose timestamp is the zero sentinel. Once the ring has
    /// wrapped, every slot is populated and the full capacity is returned.
    ///
    /// Read order is slot order, not chronological order; callers needing
    /// chronological order sort by `ash_time` themselves.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut out = Vec::new();
        for slot in self.slots.iter() {
            let sample = *lock(slot);
            if !sample.is_written() {
                break;
            }
            out.push(sample);
        }
        out
    }
}
