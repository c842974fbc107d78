//! Stable pid-to-slot assignment.
//!
//! The daemon observes backends only through their reusable numeric pids,
//! but the backend query table is addressed by stable slot index. This map
//! hands each live pid a slot for as long as the pid keeps appearing, and
//! returns slots of vanished pids to a free list for reuse. Reused slots
//! are not cleared: a stale entry transiently attributed to the new
//! occupant is the same accepted staleness window the in-server slot
//! handover has.

use std::collections::{HashMap, HashSet};

/// Fixed-capacity pid→slot allocator.
pub struct SlotMap {
    by_pid: HashMap<i32, usize>,
    free: Vec<usize>,
    capacity: usize,
}

impl SlotMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_pid: HashMap::new(),
            // Hand out low slots first.
            free: (0..capacity).rev().collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    /// Returns the slot assigned to `pid`, assigning a free one on first
    /// sight. `None` when every slot is occupied.
    pub fn slot_for(&mut self, pid: i32) -> Option<usize> {
        if let Some(&slot) = self.by_pid.get(&pid) {
            return Some(slot);
        }
        let slot = self.free.pop()?;
        self.by_pid.insert(pid, slot);
        Some(slot)
    }

    /// Releases the slots of every pid not in `live`. Released slots go to
    /// the free list without clearing their table entries.
    pub fn retain_live(&mut self, live: &HashSet<i32>) {
        let dead: Vec<i32> = self
            .by_pid
            .keys()
            .filter(|pid| !live.contains(pid))
            .copied()
            .collect();
        for pid in dead {
            if let Some(slot) = self.by_pid.remove(&pid) {
                self.free.push(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_stable_while_the_pid_is_live() {
        let mut slots = SlotMap::new(4);
        let a = slots.slot_for(100).expect("slot");
        assert_eq!(slots.slot_for(100), Some(a));
        let b = slots.slot_for(200).expect("slot");
        assert_ne!(a, b);
    }

    #[test]
    fn released_slot_is_reused_by_a_new_pid() {
        let mut slots = SlotMap::new(2);
        let a = slots.slot_for(100).expect("slot");
        slots.slot_for(200).expect("slot");

        let live: HashSet<i32> = [200].into_iter().collect();
        slots.retain_live(&live);
        assert_eq!(slots.len(), 1);

        // The handed-over slot goes to the next new pid.
        assert_eq!(slots.slot_for(300), Some(a));
    }

    #[test]
    fn exhausted_map_returns_none() {
        let mut slots = SlotMap::new(1);
        assert!(slots.slot_for(1).is_some());
        assert_eq!(slots.slot_for(2), None);
        // The existing assignment is unaffected.
        assert!(slots.slot_for(1).is_some());
    }
}
