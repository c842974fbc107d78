//! Per-backend-slot table of the most recently parsed statement.
//!
//! One slot per possible concurrent backend (max backends plus auxiliary
//! processes plus prepared-transaction slots), indexed by slot position.
//! Pids are reused across the process lifetime; the slot is the only
//! collision-free key, so each entry also records its occupant's pid and
//! lookups validate the occupant before trusting the content.
//!
//! A slot reflects the *last* statement parsed on it and may be stale —
//! describing a prior, possibly finished statement — unless the backend is
//! observed active in the same tick. Entries are never explicitly
//! destroyed; a slot is implicitly recycled when a new backend occupies
//! it, so a stale entry can transiently be attributed to the new occupant.
//! That staleness window is accepted.

use std::sync::Mutex;

use crate::error::AshError;
use crate::identity::{StatementRange, clip_statement, query_identity};
use crate::ring::lock;
use crate::text::QueryStr;

/// Most recently parsed statement on one backend slot.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BackendQueryEntry {
    /// Pid of the backend that wrote the entry; zero while unoccupied.
    pub pid: i32,
    /// Parser-assigned or derived 64-bit query identity.
    pub query_id: u64,
    /// Trimmed, truncated statement text.
    pub query: QueryStr,
}

/// Fixed-size table of [`BackendQueryEntry`], one slot per possible
/// concurrent backend.
///
/// Written by each backend for its own slot on every statement parse; read
/// by the sampler for arbitrary slots. Per-slot mutexes are held only for
/// the duration of one entry copy.
pub struct BackendQueryTable {
    slots: Box<[Mutex<BackendQueryEntry>]>,
}

impl BackendQueryTable {
    /// Allocates and zeroes a table of `max_procs` slots.
    pub fn new(max_procs: usize) -> Self {
        let slots = (0..max_procs.max(1))
            .map(|_| Mutex::new(BackendQueryEntry::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Records the statement just parsed on `slot`, overwriting the slot
    /// unconditionally. Called by the owning backend itself.
    ///
    /// The statement is clipped out of `source` per `range`, trimmed with
    /// lexer whitespace rules and truncated on store. If the parser already
    /// assigned an identity it is used verbatim; otherwise one is derived
    /// by hashing the trimmed text. Returns the identity stored.
    pub fn record(
        &self,
        slot: usize,
        pid: i32,
        source: &str,
        range: StatementRange,
        assigned_id: Option<u64>,
    ) -> Result<u64, AshError> {
        let Some(entry) = self.slots.get(slot) else {
            return Err(AshError::SlotOutOfRange {
                slot,
                capacity: self.slots.len(),
            });
        };

        let trimmed = clip_statement(source, range);
        // Hash the full trimmed text, not the truncated copy.
        let query_id = match assigned_id {
            Some(id) if id != 0 => id,
            _ => query_identity(trimmed),
        };

        let mut guard = lock(entry);
        guard.pid = pid;
        guard.query_id = query_id;
        guard.query.set(trimmed);
        Ok(query_id)
    }

    /// Finds the entry whose occupant pid matches. This is the sampler's
    /// read path; the copy is taken under the slot lock.
    ///
    /// A miss means no backend recorded a statement under this pid — the
    /// backend may have exited, or never parsed anything. Callers choose
    /// whether that is fatal (see the sampler's correlation policy).
    pub fn lookup(&self, pid: i32) -> Result<BackendQueryEntry, AshError> {
        if pid != 0 {
            for slot in self.slots.iter() {
                let entry = *lock(slot);
                if entry.pid == pid {
                    return Ok(entry);
                }
            }
        }
        Err(AshError::BackendNotFound(pid))
    }
}
