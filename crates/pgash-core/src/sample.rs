//! One recorded observation of one active backend at one capture instant.

use crate::text::{NameStr, QueryStr};

/// Sentinel stored in the wait classification fields when the backend was
/// not waiting at capture time.
pub const CPU_WAIT: &str = "CPU";

/// One observed state of one active backend at one sampling instant.
///
/// Every field is inline and fixed-size, so the record is self-contained
/// and copyable in one step. Timestamps are epoch microseconds; zero means
/// "absent". Numeric ids use zero as the absent sentinel as well.
///
/// `top_level_query` is the outer statement as reported by the activity
/// view; `query` is the innermost statement most recently parsed on the
/// same backend, resolved from the backend query table at capture time
/// together with `query_id`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Capture timestamp shared by all samples of one tick. Zero marks a
    /// slot that has never been written; readers stop at the first such
    /// slot.
    pub ash_time: i64,
    pub datid: u32,
    pub datname: NameStr,
    pub pid: i32,
    pub usesysid: u32,
    pub usename: NameStr,
    pub application_name: NameStr,
    pub client_addr: NameStr,
    pub client_hostname: NameStr,
    pub client_port: i32,
    pub backend_start: i64,
    pub xact_start: i64,
    pub query_start: i64,
    pub state_change: i64,
    pub wait_event_type: NameStr,
    pub wait_event: NameStr,
    pub state: NameStr,
    pub backend_xid: u32,
    pub backend_xmin: u32,
    pub top_level_query: QueryStr,
    pub query: QueryStr,
    /// 64-bit query identity; zero if unresolved.
    pub query_id: u64,
    pub backend_type: NameStr,
}

impl Sample {
    /// The never-written slot value: all zeros.
    pub const fn unwritten() -> Self {
        Self {
            ash_time: 0,
            datid: 0,
            datname: NameStr::empty(),
            pid: 0,
            usesysid: 0,
            usename: NameStr::empty(),
            application_name: NameStr::empty(),
            client_addr: NameStr::empty(),
            client_hostname: NameStr::empty(),
            client_port: 0,
            backend_start: 0,
            xact_start: 0,
            query_start: 0,
            state_change: 0,
            wait_event_type: NameStr::empty(),
            wait_event: NameStr::empty(),
            state: NameStr::empty(),
            backend_xid: 0,
            backend_xmin: 0,
            top_level_query: QueryStr::empty(),
            query: QueryStr::empty(),
            query_id: 0,
            backend_type: NameStr::empty(),
        }
    }

    /// Returns true once the slot has been written at least once.
    pub fn is_written(&self) -> bool {
        self.ash_time != 0
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self::unwritten()
    }
}
