//! The periodic sampling state machine.
//!
//! One dedicated task runs `Waiting → Sampling → Waiting`, driven by a
//! bounded, interruptible wait on a control channel: the wait wakes on
//! interval elapse (sample), on a reload request (apply new settings) or
//! on a stop request (terminate). The wait is the only suspension point;
//! an in-flight tick always runs to completion.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::AshError;
use crate::sample::{CPU_WAIT, Sample};
use crate::store::AshStore;
use crate::table::BackendQueryEntry;

/// One active-session record as returned by the introspection
/// collaborator for one tick. Field-for-field the activity view's row;
/// the sampler fills in defaults and the correlated statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActivityRecord {
    pub pid: i32,
    pub datid: Option<u32>,
    pub datname: Option<String>,
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
    /// Outer statement text as introspected.
    pub query: Option<String>,
    pub backend_type: Option<String>,
}

/// The introspection collaborator: enumerates currently-active backends.
///
/// One call per tick. Implementations must read within a single
/// consistent snapshot and exclude the sampler's own connection. An error
/// is fatal to the sampler run; external supervision restarts it.
pub trait ActivitySource {
    fn active_sessions(&mut self) -> Result<Vec<ActivityRecord>, AshError>;
}

/// Tunables the sampler re-reads on a reload request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerSettings {
    pub sampling_interval: Duration,
}

impl SamplerSettings {
    /// Interval in seconds, clamped to the minimum of one second.
    pub fn from_secs(secs: u64) -> Self {
        Self {
            sampling_interval: Duration::from_secs(secs.max(1)),
        }
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self::from_secs(1)
    }
}

/// Requests delivered to the sampler's wait point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlRequest {
    /// Terminate the loop.
    Stop,
    /// Apply new tunables and keep sampling. Ring capacity is not among
    /// them: backing storage is pre-sized, changing it needs a restart.
    Reload(SamplerSettings),
}

/// What to do when a sampled backend has no query table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum CorrelationPolicy {
    /// Abort the tick with an error. Matches the original behavior, which
    /// discards the rest of the tick's records.
    Strict,
    /// Record the sample with a zero identity and empty resolved text.
    #[default]
    Lenient,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplerState {
    Waiting,
    Sampling,
    ReloadingConfig,
    ShuttingDown,
}

/// The periodic driver: waits, introspects, correlates, appends.
pub struct Sampler<S> {
    store: Arc<AshStore>,
    source: S,
    settings: SamplerSettings,
    policy: CorrelationPolicy,
    control: Receiver<ControlRequest>,
    state: SamplerState,
}

impl<S: ActivitySource> Sampler<S> {
    pub fn new(
        store: Arc<AshStore>,
        source: S,
        settings: SamplerSettings,
        control: Receiver<ControlRequest>,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            policy: CorrelationPolicy::default(),
            control,
            state: SamplerState::Waiting,
        }
    }

    pub fn with_policy(mut self, policy: CorrelationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn settings(&self) -> SamplerSettings {
        self.settings
    }

    /// Runs the sampling loop until a stop request arrives (`Ok`) or a
    /// tick fails (`Err`). A failed tick is not retried in-process; the
    /// host's supervision restarts the sampler after its backoff.
    pub fn run(&mut self) -> Result<(), AshError> {
        info!(
            interval_secs = self.settings.sampling_interval.as_secs(),
            "sampler started"
        );
        loop {
            self.state = SamplerState::Waiting;
            match self.control.recv_timeout(self.settings.sampling_interval) {
                Ok(ControlRequest::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.state = SamplerState::ShuttingDown;
                    info!("sampler stopping");
                    return Ok(());
                }
                Ok(ControlRequest::Reload(settings)) => {
                    self.state = SamplerState::ReloadingConfig;
                    self.settings = settings;
                    info!(
                        interval_secs = settings.sampling_interval.as_secs(),
                        "sampler settings reloaded"
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.state = SamplerState::Sampling;
                    self.tick()?;
                }
            }
        }
    }

    /// Waits out a supervision backoff, still honoring control requests.
    /// Returns true if a stop request arrived during the wait.
    pub fn wait_for_stop(&mut self, backoff: Duration) -> bool {
        match self.control.recv_timeout(backoff) {
            Ok(ControlRequest::Stop) | Err(RecvTimeoutError::Disconnected) => true,
            Ok(ControlRequest::Reload(settings)) => {
                self.settings = settings;
                false
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// One sampling tick: a consistent active-session snapshot, one shared
    /// capture timestamp, correlation per record, one append per record.
    ///
    /// Appends are independent per record; a correlation fault under the
    /// strict policy aborts the remainder of the tick but leaves already
    /// appended samples intact.
    pub fn tick(&mut self) -> Result<usize, AshError> {
        let records = self.source.active_sessions()?;
        if records.is_empty() {
            debug!("tick: no active sessions");
            return Ok(0);
        }

        let ash_time = Utc::now().timestamp_micros();
        let mut appended = 0;
        for record in &records {
            let parsed = match self.store.backend_queries().lookup(record.pid) {
                Ok(entry) => Some(entry),
                Err(err) => match self.policy {
                    CorrelationPolicy::Strict => return Err(err),
                    CorrelationPolicy::Lenient => {
                        warn!(pid = record.pid, "no parsed statement for backend, sampling without identity");
                        None
                    }
                },
            };
            let sample = build_sample(ash_time, record, parsed.as_ref());
            self.store.history().append(sample);
            appended += 1;
        }
        debug!(appended, "tick complete");
        Ok(appended)
    }
}

/// Assembles one sample from the introspected record plus the correlated
/// statement entry. Null wait fields default to the "CPU" sentinel.
fn build_sample(
    ash_time: i64,
    record: &ActivityRecord,
    parsed: Option<&BackendQueryEntry>,
) -> Sample {
    let mut sample = Sample::unwritten();
    sample.ash_time = ash_time;
    sample.pid = record.pid;
    sample.datid = record.datid.unwrap_or(0);
    sample.datname.set(record.datname.as_deref().unwrap_or(""));
    sample.usesysid = record.usesysid.unwrap_or(0);
    sample.usename.set(record.usename.as_deref().unwrap_or(""));
    sample
        .application_name
        .set(record.application_name.as_deref().unwrap_or(""));
    sample
        .client_addr
        .set(record.client_addr.as_deref().unwrap_or(""));
    sample
        .client_hostname
        .set(record.client_hostname.as_deref().unwrap_or(""));
    sample.client_port = record.client_port.unwrap_or(0);
    sample.backend_start = micros(record.backend_start);
    sample.xact_start = micros(record.xact_start);
    sample.query_start = micros(record.query_start);
    sample.state_change = micros(record.state_change);
    sample
        .wait_event_type
        .set(record.wait_event_type.as_deref().unwrap_or(CPU_WAIT));
    sample
        .wait_event
        .set(record.wait_event.as_deref().unwrap_or(CPU_WAIT));
    sample.state.set(record.state.as_deref().unwrap_or(""));
    sample.backend_xid = record.backend_xid.unwrap_or(0);
    sample.backend_xmin = record.backend_xmin.unwrap_or(0);
    sample
        .top_level_query
        .set(record.query.as_deref().unwrap_or(""));
    if let Some(entry) = parsed {
        sample.query_id = entry.query_id;
        sample.query = entry.query;
    }
    sample
        .backend_type
        .set(record.backend_type.as_deref().unwrap_or(""));
    sample
}

fn micros(time: Option<DateTime<Utc>>) -> i64 {
    time.map(|t| t.timestamp_micros()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StatementRange;
    use crate::store::StoreSettings;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    /// Returns one scripted record batch per tick, then empty batches.
    struct ScriptedSource {
        ticks: VecDeque<Result<Vec<ActivityRecord>, AshError>>,
    }

    impl ScriptedSource {
        fn new(ticks: Vec<Result<Vec<ActivityRecord>, AshError>>) -> Self {
            Self {
                ticks: ticks.into(),
            }
        }
    }

    impl ActivitySource for ScriptedSource {
        fn active_sessions(&mut self) -> Result<Vec<ActivityRecord>, AshError> {
            self.ticks.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn active_record(pid: i32, query: &str) -> ActivityRecord {
        ActivityRecord {
            pid,
            datname: Some("postgres".to_string()),
            state: Some("active".to_string()),
            query: Some(query.to_string()),
            backend_type: Some("client backend".to_string()),
            ..ActivityRecord::default()
        }
    }

    fn store_with_capacity(max_entries: usize) -> Arc<AshStore> {
        Arc::new(AshStore::new(StoreSettings::new(max_entries, 8)))
    }

    #[test]
    fn end_to_end_three_ticks() {
        let store = store_with_capacity(3);
        store
            .backend_queries()
            .record(0, 100, "SELECT 1", StatementRange::WHOLE, Some(42))
            .expect("prime slot");

        let source = ScriptedSource::new(vec![
            Ok(vec![active_record(100, "SELECT 1")]),
            Ok(Vec::new()),
            Ok(vec![active_record(100, "SELECT 2")]),
        ]);
        let (_tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(Arc::clone(&store), source, SamplerSettings::default(), rx);

        // Tick 1: one active backend, correlated against the primed slot.
        assert_eq!(sampler.tick().expect("tick 1"), 1);
        let snapshot = store.history().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, 100);
        assert_eq!(snapshot[0].query_id, 42);
        assert_eq!(snapshot[0].query.as_str(), "SELECT 1");
        assert_eq!(snapshot[0].top_level_query.as_str(), "SELECT 1");
        assert_eq!(snapshot[0].wait_event_type.as_str(), "CPU");
        assert_eq!(snapshot[0].wait_event.as_str(), "CPU");

        // Tick 2: nothing active, ring unchanged.
        assert_eq!(sampler.tick().expect("tick 2"), 0);
        assert_eq!(store.history().snapshot().len(), 1);

        // Tick 3: the backend parsed a new statement in between.
        store
            .backend_queries()
            .record(0, 100, "SELECT 2", StatementRange::WHOLE, Some(43))
            .expect("reprime slot");
        assert_eq!(sampler.tick().expect("tick 3"), 1);

        let snapshot = store.history().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].query_id, 43);
        // Slot 2 is still the unwritten sentinel; snapshot stopped before it.
    }

    #[test]
    fn all_samples_of_one_tick_share_the_capture_timestamp() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(vec![Ok(vec![
            active_record(1, "SELECT 1"),
            active_record(2, "SELECT 2"),
        ])]);
        let (_tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(Arc::clone(&store), source, SamplerSettings::default(), rx);

        assert_eq!(sampler.tick().expect("tick"), 2);
        let snapshot = store.history().snapshot();
        assert_eq!(snapshot[0].ash_time, snapshot[1].ash_time);
    }

    #[test]
    fn lenient_policy_samples_without_identity() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(vec![Ok(vec![active_record(555, "SELECT 1")])]);
        let (_tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(Arc::clone(&store), source, SamplerSettings::default(), rx)
            .with_policy(CorrelationPolicy::Lenient);

        assert_eq!(sampler.tick().expect("tick"), 1);
        let snapshot = store.history().snapshot();
        assert_eq!(snapshot[0].query_id, 0);
        assert!(snapshot[0].query.is_empty());
        // The outer statement is still captured.
        assert_eq!(snapshot[0].top_level_query.as_str(), "SELECT 1");
    }

    #[test]
    fn strict_policy_aborts_the_tick_on_a_miss() {
        let store = store_with_capacity(4);
        store
            .backend_queries()
            .record(0, 1, "SELECT 1", StatementRange::WHOLE, Some(7))
            .expect("prime slot");
        // pid 999 has no table entry; it is ordered after pid 1.
        let source = ScriptedSource::new(vec![Ok(vec![
            active_record(1, "SELECT 1"),
            active_record(999, "SELECT X"),
        ])]);
        let (_tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(Arc::clone(&store), source, SamplerSettings::default(), rx)
            .with_policy(CorrelationPolicy::Strict);

        match sampler.tick() {
            Err(AshError::BackendNotFound(pid)) => assert_eq!(pid, 999),
            other => panic!("expected BackendNotFound, got {:?}", other),
        }
        // The sample appended before the fault is intact.
        let snapshot = store.history().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].query_id, 7);
    }

    #[test]
    fn introspection_failure_terminates_the_run() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(vec![Err(AshError::Introspection(
            "connection refused".to_string(),
        ))]);
        let (_tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(store, source, SamplerSettings::default(), rx);
        sampler.settings.sampling_interval = Duration::from_millis(10);

        match sampler.run() {
            Err(AshError::Introspection(msg)) => assert!(msg.contains("refused")),
            other => panic!("expected Introspection, got {:?}", other),
        }
        assert_eq!(sampler.state(), SamplerState::Sampling);
    }

    #[test]
    fn stop_request_ends_the_run_cleanly() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(Vec::new());
        let (tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(store, source, SamplerSettings::default(), rx);

        tx.send(ControlRequest::Stop).expect("send stop");
        sampler.run().expect("clean stop");
        assert_eq!(sampler.state(), SamplerState::ShuttingDown);
    }

    #[test]
    fn reload_applies_new_settings_and_keeps_running() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(Vec::new());
        let (tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(store, source, SamplerSettings::default(), rx);

        tx.send(ControlRequest::Reload(SamplerSettings::from_secs(5)))
            .expect("send reload");
        tx.send(ControlRequest::Stop).expect("send stop");
        sampler.run().expect("clean stop");
        assert_eq!(sampler.settings().sampling_interval, Duration::from_secs(5));
    }

    #[test]
    fn disconnected_control_channel_stops_the_sampler() {
        let store = store_with_capacity(4);
        let source = ScriptedSource::new(Vec::new());
        let (tx, rx) = mpsc::channel();
        let mut sampler = Sampler::new(store, source, SamplerSettings::default(), rx);

        drop(tx);
        sampler.run().expect("clean stop");
        assert_eq!(sampler.state(), SamplerState::ShuttingDown);
    }

    #[test]
    fn settings_clamp_to_one_second_minimum() {
        assert_eq!(
            SamplerSettings::from_secs(0).sampling_interval,
            Duration::from_secs(1)
        );
    }
}
