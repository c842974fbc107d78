//! Feeds the backend query table from observed statement text.
//!
//! Inside the server, the post-parse hook records each statement on the
//! parsing backend's own slot. A standalone daemon has no such hook, so
//! this adapter stands in for it: on every tick it records each observed
//! backend's statement text (with a derived identity) into the table
//! before the sampler correlates, using [`SlotMap`] as the stable slot
//! addressing.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use pgash_core::error::AshError;
use pgash_core::identity::StatementRange;
use pgash_core::sampler::{ActivityRecord, ActivitySource};
use pgash_core::store::AshStore;

use crate::slots::SlotMap;

/// Wraps an [`ActivitySource`] and records each returned backend's
/// statement into the store's backend query table.
pub struct ParseFeed<S> {
    inner: S,
    store: Arc<AshStore>,
    slots: SlotMap,
}

impl<S> ParseFeed<S> {
    pub fn new(inner: S, store: Arc<AshStore>) -> Self {
        let slots = SlotMap::new(store.backend_queries().capacity());
        Self {
            inner,
            store,
            slots,
        }
    }
}

impl<S: ActivitySource> ActivitySource for ParseFeed<S> {
    fn active_sessions(&mut self) -> Result<Vec<ActivityRecord>, AshError> {
        let records = self.inner.active_sessions()?;

        let live: HashSet<i32> = records.iter().map(|r| r.pid).collect();
        self.slots.retain_live(&live);

        for record in &records {
            let Some(query) = record.query.as_deref() else {
                continue;
            };
            if query.is_empty() {
                continue;
            }
            let Some(slot) = self.slots.slot_for(record.pid) else {
                warn!(pid = record.pid, "no free backend slot, statement not recorded");
                continue;
            };
            if let Err(e) =
                self.store
                    .backend_queries()
                    .record(slot, record.pid, query, StatementRange::WHOLE, None)
            {
                warn!(pid = record.pid, slot, error = %e, "failed to record statement");
            }
        }

        Ok(records)
    }
}
