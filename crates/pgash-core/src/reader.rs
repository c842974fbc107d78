//! Tabular projection of the history ring.
//!
//! Projects every sample field as a nullable column: a field is null when
//! its backing value is the zero/empty sentinel, except the capture
//! timestamp and the query identity, which are always present once a slot
//! is populated. The view is read-only, point-in-time and
//! non-transactional: appends running concurrently with materialization
//! may interleave per slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AshError;
use crate::sample::Sample;
use crate::store::{self, AshStore};
use crate::text::BoundedStr;

/// Column names, in projection order.
pub const HISTORY_COLUMNS: [&str; 23] = [
    "ash_time",
    "datid",
    "datname",
    "pid",
    "usesysid",
    "usename",
    "application_name",
    "client_addr",
    "client_hostname",
    "client_port",
    "backend_start",
    "xact_start",
    "query_start",
    "state_change",
    "wait_event_type",
    "wait_event",
    "state",
    "backend_xid",
    "backend_xmin",
    "top_level_query",
    "query",
    "query_id",
    "backend_type",
];

/// One materialized history row. Fields are declared in projection order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub ash_time: DateTime<Utc>,
    pub datid: Option<u32>,
    pub datname: Option<String>,
    pub pid: Option<i32>,
    pub usesysid: Option<u32>,
    pub usename: Option<String>,
    pub application_name: Option<String>,
    pub client_addr: Option<String>,
    pub client_hostname: Option<String>,
    pub client_port: Option<i32>,
    pub backend_start: Option<DateTime<Utc>>,
    pub xact_start: Option<DateTime<Utc>>,
    pub query_start: Option<DateTime<Utc>>,
    pub state_change: Option<DateTime<Utc>>,
    pub wait_event_type: Option<String>,
    pub wait_event: Option<String>,
    pub state: Option<String>,
    pub backend_xid: Option<u32>,
    pub backend_xmin: Option<u32>,
    pub top_level_query: Option<String>,
    pub query: Option<String>,
    pub query_id: i64,
    pub backend_type: Option<String>,
}

/// Materializes the process-wide history into rows.
///
/// Fails with [`AshError::NotInitialized`] if the host never initialized
/// the storage (the background sampler has never started).
pub fn active_session_history() -> Result<Vec<HistoryRow>, AshError> {
    let store = store::get();
    materialize(store.as_deref())
}

pub(crate) fn materialize(store: Option<&AshStore>) -> Result<Vec<HistoryRow>, AshError> {
    let store = store.ok_or(AshError::NotInitialized)?;
    Ok(store.history().snapshot().iter().map(row_of).collect())
}

/// Materializes a specific store. The daemon's export path.
pub fn history_rows(store: &AshStore) -> Vec<HistoryRow> {
    store.history().snapshot().iter().map(row_of).collect()
}

fn row_of(sample: &Sample) -> HistoryRow {
    HistoryRow {
        ash_time: time_of(sample.ash_time).unwrap_or_default(),
        datid: nonzero(sample.datid),
        datname: text_of(&sample.datname),
        pid: (sample.pid != 0).then_some(sample.pid),
        usesysid: nonzero(sample.usesysid),
        usename: text_of(&sample.usename),
        application_name: text_of(&sample.application_name),
        client_addr: text_of(&sample.client_addr),
        client_hostname: text_of(&sample.client_hostname),
        // Zero doubles as "no port"; unix-socket backends report null here.
        client_port: (sample.client_port != 0).then_some(sample.client_port),
        backend_start: time_of(sample.backend_start),
        xact_start: time_of(sample.xact_start),
        query_start: time_of(sample.query_start),
        state_change: time_of(sample.state_change),
        wait_event_type: text_of(&sample.wait_event_type),
        wait_event: text_of(&sample.wait_event),
        state: text_of(&sample.state),
        backend_xid: nonzero(sample.backend_xid),
        backend_xmin: nonzero(sample.backend_xmin),
        top_level_query: text_of(&sample.top_level_query),
        query: text_of(&sample.query),
        query_id: sample.query_id as i64,
        backend_type: text_of(&sample.backend_type),
    }
}

fn text_of<const N: usize>(text: &BoundedStr<N>) -> Option<String> {
    (!text.is_empty()).then(|| text.as_str().to_string())
}

fn time_of(micros: i64) -> Option<DateTime<Utc>> {
    if micros == 0 {
        return None;
    }
    DateTime::from_timestamp_micros(micros)
}

fn nonzero(value: u32) -> Option<u32> {
    (value != 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSettings;

    #[test]
    fn uninitialized_store_is_a_precondition_error() {
        match materialize(None) {
            Err(AshError::NotInitialized) => {}
            other => panic!("expected NotInitialized, got {:?}", other),
        }
    }

    #[test]
    fn twenty_three_columns_in_fixed_order() {
        assert_eq!(HISTORY_COLUMNS.len(), 23);
        assert_eq!(HISTORY_COLUMNS[0], "ash_time");
        assert_eq!(HISTORY_COLUMNS[21], "query_id");
        assert_eq!(HISTORY_COLUMNS[22], "backend_type");
    }

    #[test]
    fn sentinel_values_project_as_null() {
        let store = AshStore::new(StoreSettings::new(2, 2));
        let mut sample = Sample::unwritten();
        sample.ash_time = 1_700_000_000_000_000;
        sample.pid = 100;
        sample.query_id = 42;
        store.history().append(sample);

        let rows = history_rows(&store);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];

        // Always present once the slot is populated.
        assert_eq!(row.ash_time.timestamp_micros(), 1_700_000_000_000_000);
        assert_eq!(row.query_id, 42);
        assert_eq!(row.pid, Some(100));

        // Everything left at the sentinel is null.
        assert_eq!(row.datid, None);
        assert_eq!(row.datname, None);
        assert_eq!(row.client_port, None);
        assert_eq!(row.backend_start, None);
        assert_eq!(row.xact_start, None);
        assert_eq!(row.wait_event_type, None);
        assert_eq!(row.backend_xid, None);
        assert_eq!(row.top_level_query, None);
        assert_eq!(row.query, None);
        assert_eq!(row.backend_type, None);
    }

    #[test]
    fn populated_fields_project_as_values() {
        let store = AshStore::new(StoreSettings::new(2, 2));
        let mut sample = Sample::unwritten();
        sample.ash_time = 1_700_000_000_000_000;
        sample.pid = 100;
        sample.datid = 5;
        sample.datname.set("postgres");
        sample.wait_event_type.set("CPU");
        sample.query.set("SELECT 1");
        sample.query_id = 7;
        sample.backend_start = 1_600_000_000_000_000;
        store.history().append(sample);

        let row = &history_rows(&store)[0];
        assert_eq!(row.datid, Some(5));
        assert_eq!(row.datname.as_deref(), Some("postgres"));
        assert_eq!(row.wait_event_type.as_deref(), Some("CPU"));
        assert_eq!(row.query.as_deref(), Some("SELECT 1"));
        assert_eq!(
            row.backend_start.map(|t| t.timestamp_micros()),
            Some(1_600_000_000_000_000)
        );
    }

    #[test]
    fn materialization_stops_at_the_first_unwritten_slot() {
        let store = AshStore::new(StoreSettings::new(4, 2));
        let mut sample = Sample::unwritten();
        sample.ash_time = 1;
        store.history().append(sample);
        sample.ash_time = 2;
        store.history().append(sample);

        assert_eq!(history_rows(&store).len(), 2);
    }
}
