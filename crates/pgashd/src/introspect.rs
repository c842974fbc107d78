//! pg_stat_activity introspection over a `postgres` connection.
//!
//! Connects using the standard libpq environment variables:
//! - PGHOST (default: localhost)
//! - PGPORT (default: 5432)
//! - PGUSER (default: $USER)
//! - PGPASSWORD (default: empty)
//! - PGDATABASE (default: postgres, or the `--dbname` flag)
//!
//! Each tick runs one query inside its own transaction, so all rows come
//! from a single consistent snapshot, and excludes the sampler's own
//! backend.

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use tracing::debug;

use pgash_core::error::AshError;
use pgash_core::sampler::{ActivityRecord, ActivitySource};

/// Auxiliary process slots the server reserves beyond configured backends.
const NUM_AUXILIARY_PROCS: usize = 5;

/// Active-session query, shaped like the original extension's: only
/// active backends, never the sampler itself. xid columns go through
/// text because the driver has no binary mapping for them.
const ACTIVITY_QUERY: &str = "\
    SELECT datid, datname::text AS datname, pid, usesysid, usename::text AS usename, \
           application_name, client_addr::text AS client_addr, client_hostname, client_port, \
           backend_start, xact_start, query_start, state_change, \
           wait_event_type, wait_event, state, \
           backend_xid::text AS backend_xid, backend_xmin::text AS backend_xmin, \
           query, backend_type \
    FROM pg_stat_activity \
    WHERE state = 'active' AND pid != pg_backend_pid()";

/// Sums the settings that bound concurrent backends, the way the server
/// itself computes MaxBackends. The +1 is the autovacuum launcher.
const BACKEND_SLOTS_QUERY: &str = "\
    SELECT current_setting('max_connections')::int \
         + current_setting('autovacuum_max_workers')::int \
         + current_setting('max_worker_processes')::int \
         + current_setting('max_wal_senders')::int \
         + current_setting('max_prepared_transactions')::int \
         + 1 AS slots";

/// The introspection collaborator: queries pg_stat_activity once per tick.
///
/// The connection is established lazily and dropped on any query error;
/// the next tick reconnects.
pub struct PgIntrospector {
    connection_string: String,
    client: Option<Client>,
    server_version_num: Option<i32>,
}

impl PgIntrospector {
    /// Builds a connection string from the environment. `dbname` overrides
    /// PGDATABASE; with neither set, the sampler connects to `postgres`.
    pub fn from_env(dbname: Option<&str>) -> Result<Self, AshError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| AshError::Introspection("PGUSER or USER not set".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = dbname
            .map(str::to_string)
            .or_else(|| std::env::var("PGDATABASE").ok())
            .unwrap_or_else(|| "postgres".to_string());

        let connection_string = if password.is_empty() {
            format!(
                "host={} port={} user={} dbname={} application_name=pgashd",
                host, port, user, database
            )
        } else {
            format!(
                "host={} port={} user={} password={} dbname={} application_name=pgashd",
                host, port, user, password, database
            )
        };

        Ok(Self::with_connection_string(connection_string))
    }

    /// Creates an introspector with an explicit connection string.
    pub fn with_connection_string(connection_string: String) -> Self {
        Self {
            connection_string,
            client: None,
            server_version_num: None,
        }
    }

    /// Attempts to connect. Useful for a startup check before launching
    /// the sampler.
    pub fn try_connect(&mut self) -> Result<(), AshError> {
        self.ensure_connected()
    }

    /// Probes how many backend slots the server can occupy concurrently:
    /// max backends plus auxiliary processes plus prepared-transaction
    /// slots. Sizes the backend query table.
    pub fn probe_backend_slots(&mut self) -> Result<usize, AshError> {
        self.ensure_connected()?;
        let Some(client) = self.client.as_mut() else {
            return Err(AshError::Introspection("not connected".to_string()));
        };
        match client.query_one(BACKEND_SLOTS_QUERY, &[]) {
            Ok(row) => {
                let slots: i32 = row.get("slots");
                Ok(slots.max(1) as usize + NUM_AUXILIARY_PROCS)
            }
            Err(e) => {
                self.client = None;
                Err(AshError::Introspection(format_postgres_error(&e)))
            }
        }
    }

    fn ensure_connected(&mut self) -> Result<(), AshError> {
        if self.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());
                debug!(version = ?self.server_version_num, "connected to PostgreSQL");
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                self.server_version_num = None;
                Err(AshError::Introspection(format_postgres_error(&e)))
            }
        }
    }
}

impl ActivitySource for PgIntrospector {
    fn active_sessions(&mut self) -> Result<Vec<ActivityRecord>, AshError> {
        self.ensure_connected()?;
        let Some(client) = self.client.as_mut() else {
            return Err(AshError::Introspection("not connected".to_string()));
        };

        let result = (|| {
            let mut tx = client.transaction()?;
            let rows = tx.query(ACTIVITY_QUERY, &[])?;
            tx.commit()?;
            Ok::<_, postgres::Error>(rows)
        })();

        match result {
            Ok(rows) => Ok(rows.iter().filter_map(record_of).collect()),
            Err(e) => {
                // Drop the connection; the next tick reconnects.
                self.client = None;
                self.server_version_num = None;
                Err(AshError::Introspection(format_postgres_error(&e)))
            }
        }
    }
}

fn record_of(row: &postgres::Row) -> Option<ActivityRecord> {
    let pid: Option<i32> = row.get("pid");
    Some(ActivityRecord {
        pid: pid?,
        datid: row.get("datid"),
        datname: row.get("datname"),
        usesysid: row.get("usesysid"),
        usename: row.get("usename"),
        application_name: row.get("application_name"),
        client_addr: row.get("client_addr"),
        client_hostname: row.get("client_hostname"),
        client_port: row.get("client_port"),
        backend_start: row.get::<_, Option<DateTime<Utc>>>("backend_start"),
        xact_start: row.get::<_, Option<DateTime<Utc>>>("xact_start"),
        query_start: row.get::<_, Option<DateTime<Utc>>>("query_start"),
        state_change: row.get::<_, Option<DateTime<Utc>>>("state_change"),
        wait_event_type: row.get("wait_event_type"),
        wait_event: row.get("wait_event"),
        state: row.get("state"),
        backend_xid: parse_xid(row.get("backend_xid")),
        backend_xmin: parse_xid(row.get("backend_xmin")),
        query: row.get("query"),
        backend_type: row.get("backend_type"),
    })
}

/// xid values arrive as decimal text; anything unparsable is absent.
fn parse_xid(value: Option<String>) -> Option<u32> {
    value.and_then(|v| v.trim().parse::<u32>().ok())
}

/// Formats a PostgreSQL error message for logs.
fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_query_excludes_self_and_idle_backends() {
        assert!(ACTIVITY_QUERY.contains("state = 'active'"));
        assert!(ACTIVITY_QUERY.contains("pid != pg_backend_pid()"));
    }

    #[test]
    fn parse_xid_handles_text_values() {
        assert_eq!(parse_xid(Some("748".to_string())), Some(748));
        assert_eq!(parse_xid(Some(" 12 ".to_string())), Some(12));
        assert_eq!(parse_xid(Some("not-a-number".to_string())), None);
        assert_eq!(parse_xid(None), None);
    }
}
