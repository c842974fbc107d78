//! Owned storage bundle and process-wide registration.
//!
//! All backing arrays are allocated and zeroed in one initialization step;
//! there is no resizing, no dynamic growth and no allocation on the hot
//! sampling path. The process-wide [`init`] mirrors the original's
//! shared-memory attachment and backs the projection precondition check in
//! [`crate::reader`].

use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::ring::SessionHistoryRing;
use crate::table::BackendQueryTable;

/// Sizing of the history storage, fixed at initialization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoreSettings {
    /// History ring capacity.
    pub max_entries: usize,
    /// Backend query table size: max backends plus auxiliary processes
    /// plus prepared-transaction slots.
    pub max_procs: usize,
}

impl StoreSettings {
    pub fn new(max_entries: usize, max_procs: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_procs: max_procs.max(1),
        }
    }
}

/// The history ring and the backend query table, owned together.
pub struct AshStore {
    history: SessionHistoryRing,
    backend_queries: BackendQueryTable,
}

impl AshStore {
    /// Allocates both arrays, zeroed.
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            history: SessionHistoryRing::new(settings.max_entries),
            backend_queries: BackendQueryTable::new(settings.max_procs),
        }
    }

    pub fn history(&self) -> &SessionHistoryRing {
        &self.history
    }

    pub fn backend_queries(&self) -> &BackendQueryTable {
        &self.backend_queries
    }

    /// Teardown hook. Extension point for dumping the ring to durable
    /// storage; nothing is flushed yet.
    pub fn shutdown(&self) {}
}

static STORE: OnceLock<Arc<AshStore>> = OnceLock::new();

/// Initializes the process-wide store, or returns the existing one if a
/// previous initialization already ran.
pub fn init(settings: StoreSettings) -> Arc<AshStore> {
    let store = STORE.get_or_init(|| {
        info!(
            max_entries = settings.max_entries,
            max_procs = settings.max_procs,
            "history storage initialized"
        );
        Arc::new(AshStore::new(settings))
    });
    Arc::clone(store)
}

/// Returns the process-wide store, if initialized.
pub fn get() -> Option<Arc<AshStore>> {
    STORE.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = init(StoreSettings::new(8, 8));
        let second = init(StoreSettings::new(999, 999));
        assert!(Arc::ptr_eq(&first, &second));
        // First initialization wins; capacity is fixed for the process.
        assert_eq!(second.history().capacity(), 8);
        let registered = get().expect("store registered");
        assert!(Arc::ptr_eq(&first, &registered));
    }

    #[test]
    fn settings_enforce_nonzero_sizes() {
        let settings = StoreSettings::new(0, 0);
        assert_eq!(settings.max_entries, 1);
        assert_eq!(settings.max_procs, 1);
    }
}
