//! pgashd - Active session history sampler daemon.
//!
//! Samples pg_stat_activity at a fixed interval and retains the samples in
//! a bounded in-memory ring, joined against the most recently observed
//! statement per backend. On exit the history can be dumped as JSON rows.

mod feed;
mod introspect;
mod slots;

use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgash_core::reader::history_rows;
use pgash_core::sampler::{ControlRequest, CorrelationPolicy, Sampler, SamplerSettings};
use pgash_core::store::{self, StoreSettings};

use feed::ParseFeed;
use introspect::PgIntrospector;

/// Smallest permitted ring capacity.
const MIN_ENTRIES: usize = 1000;

/// Backend query table size used when the server cannot be probed at
/// startup.
const DEFAULT_BACKEND_SLOTS: usize = 1024;

/// Delay before restarting the sampler after a failed run.
const RESTART_DELAY: Duration = Duration::from_secs(10);

/// Active session history sampler daemon.
#[derive(Parser)]
#[command(name = "pgashd", about = "Active session history sampler for PostgreSQL", version)]
struct Args {
    /// Sampling interval in seconds (minimum 1).
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// History ring capacity (minimum 1000). Fixed for the process
    /// lifetime; restart to change it.
    #[arg(short = 'e', long, default_value = "1000")]
    max_entries: usize,

    /// Database the sampler connects to (overrides PGDATABASE).
    #[arg(short, long)]
    dbname: Option<String>,

    /// Abort a whole tick when a sampled backend has no recorded
    /// statement, instead of sampling it with a null identity.
    #[arg(long)]
    strict_correlation: bool,

    /// Dump the retained history as JSON rows on shutdown.
    #[arg(long)]
    dump_on_exit: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgashd={}", level).parse().expect("valid directive"))
        .add_directive(
            format!("pgash_core={}", level)
                .parse()
                .expect("valid directive"),
        );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Ring capacity with the configured minimum applied.
fn effective_max_entries(requested: usize) -> usize {
    requested.max(MIN_ENTRIES)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("pgashd {} starting", env!("CARGO_PKG_VERSION"));

    let mut introspector = match PgIntrospector::from_env(args.dbname.as_deref()) {
        Ok(introspector) => introspector,
        Err(e) => {
            error!("cannot build connection settings: {}", e);
            std::process::exit(1);
        }
    };

    // Size the backend query table from the server's own limits when the
    // server is reachable at startup.
    let backend_slots = match introspector.try_connect() {
        Ok(()) => match introspector.probe_backend_slots() {
            Ok(slots) => slots,
            Err(e) => {
                warn!("backend slot probe failed ({}), using default", e);
                DEFAULT_BACKEND_SLOTS
            }
        },
        Err(e) => {
            warn!(
                "PostgreSQL not reachable at startup ({}), sampler will keep retrying",
                e
            );
            DEFAULT_BACKEND_SLOTS
        }
    };

    let max_entries = effective_max_entries(args.max_entries);
    let store = store::init(StoreSettings::new(max_entries, backend_slots));
    info!(
        "history ring: {} entries, backend query table: {} slots",
        max_entries, backend_slots
    );

    let (control_tx, control_rx) = mpsc::channel::<ControlRequest>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = control_tx.send(ControlRequest::Stop);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    let policy = if args.strict_correlation {
        CorrelationPolicy::Strict
    } else {
        CorrelationPolicy::Lenient
    };
    let source = ParseFeed::new(introspector, store.clone());
    let mut sampler = Sampler::new(
        store.clone(),
        source,
        SamplerSettings::from_secs(args.interval),
        control_rx,
    )
    .with_policy(policy);

    // Supervision: a failed run is restarted after a fixed backoff; only a
    // stop request ends the process.
    loop {
        match sampler.run() {
            Ok(()) => break,
            Err(e) => {
                error!(
                    "sampler terminated: {}; restarting in {}s",
                    e,
                    RESTART_DELAY.as_secs()
                );
                if sampler.wait_for_stop(RESTART_DELAY) {
                    break;
                }
            }
        }
    }

    info!("shutting down");

    if args.dump_on_exit {
        use std::io::Write;

        let rows = history_rows(&store);
        info!("dumping {} history rows", rows.len());
        let mut stdout = std::io::stdout().lock();
        for row in &rows {
            let line = match serde_json::to_string(row) {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to serialize history row: {}", e);
                    break;
                }
            };
            if let Err(e) = writeln!(stdout, "{}", line) {
                error!("failed to write history dump: {}", e);
                break;
            }
        }
    }

    store.shutdown();
    info!("shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_entries_clamps_to_the_minimum() {
        assert_eq!(effective_max_entries(0), MIN_ENTRIES);
        assert_eq!(effective_max_entries(500), MIN_ENTRIES);
        assert_eq!(effective_max_entries(5000), 5000);
    }
}
