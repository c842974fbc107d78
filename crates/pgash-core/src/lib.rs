//! pgash-core — active session history for PostgreSQL-style servers.
//!
//! Continuously samples the set of currently-active backends and retains a
//! bounded, fixed-size history of those samples, so "what was running over
//! the last N minutes" can be answered without per-statement logging.
//!
//! Provides:
//! - `text` — fixed-capacity inline strings used by all shared records
//! - `identity` — statement trimming and derived query identities
//! - `table` — per-backend-slot table of the most recently parsed statement
//! - `ring` — fixed-capacity circular history of samples
//! - `sampler` — the periodic sampling state machine
//! - `store` — owned storage bundle and process-wide registration
//! - `reader` — tabular projection of the history ring
//!
//! The enumeration of active backends is a collaborator behind the
//! [`sampler::ActivitySource`] trait; a `postgres`-backed implementation
//! lives in the `pgashd` daemon crate.

pub mod error;
pub mod identity;
pub mod reader;
pub mod ring;
pub mod sample;
pub mod sampler;
pub mod store;
pub mod table;
pub mod text;

pub use error::AshError;
pub use reader::{HistoryRow, active_session_history};
pub use ring::SessionHistoryRing;
pub use sample::Sample;
pub use sampler::{ActivityRecord, ActivitySource, ControlRequest, Sampler};
pub use store::{AshStore, StoreSettings};
pub use table::BackendQueryTable;
