//! # Coalesce - cache file merger daemon
//!
//! Watches a fixed set of cache files and, once one of them reaches the size
//! threshold, appends its contents to the configured aggregate file and
//! starts it over empty. Runs one check at startup and then one per
//! interval until SIGINT or SIGTERM. A second signal exits immediately with
//! status 130, leaving any in-flight staging file for the next start.
//!
//! ## Configuration
//!
//! Every flag can also be set through the environment:
//!
//! ```text
//! --config PATH    COALESCE_CONFIG    JSON object: cache path -> aggregate path (required)
//! --interval SECS  COALESCE_INTERVAL  seconds between checks            (default: 86400)
//! --max-size SIZE  COALESCE_MAX_SIZE  merge threshold, e.g. 512mb, 1gb  (default: 1gb)
//! --sync           COALESCE_SYNC      fsync every aggregate append      (default: false)
//! --log-level LVL  COALESCE_LOG       tracing filter, RUST_LOG wins     (default: info)
//! --once                              run a single check and exit
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cat pairs.json
//! {"/var/log/app/shard-0.log": "/var/archive/app.log"}
//! $ coalesce --config pairs.json --max-size 256mb --interval 3600
//! INFO coalesce started pairs=1 aggregates=1 threshold="256.00 MiB" interval_secs=3600 sync=false
//! INFO merge tick started tick=1 pairs=1 aggregates=1
//! ```

mod logging;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{
    format_size, parse_size, Config, FilePairMapping, DEFAULT_INTERVAL_SECS, DEFAULT_MAX_SIZE,
};
use engine::{MergeSet, Scheduler, Shutdown};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "coalesce", version, about = "Rolls full cache files into aggregate files")]
struct Args {
    /// JSON file mapping cache file paths to aggregate file paths.
    #[arg(long = "config", env = "COALESCE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seconds between two merge checks.
    #[arg(long, env = "COALESCE_INTERVAL", value_name = "SECS", default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,

    /// Cache size that triggers a merge (`1gb`, `512mb`, `4096`, ...).
    #[arg(
        long = "max-size",
        env = "COALESCE_MAX_SIZE",
        value_name = "SIZE",
        default_value = DEFAULT_MAX_SIZE,
        value_parser = parse_max_size
    )]
    max_size: u64,

    /// fsync the aggregate after every append.
    #[arg(long, env = "COALESCE_SYNC")]
    sync: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, env = "COALESCE_LOG", value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Run one check (including startup recovery) and exit.
    #[arg(long)]
    once: bool,
}

fn parse_max_size(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

/// Turns parsed arguments into a validated [`Config`].
fn load_config(args: &Args) -> Result<Config> {
    let path = args
        .config
        .as_ref()
        .ok_or_else(|| anyhow!("no files passed, please supply a --config argument"))?;
    let pairs = FilePairMapping::load(path)?;
    Ok(Config::new(pairs, args.max_size, args.interval, args.sync)?)
}

/// Exit status used when a second signal cuts a tick short.
const FORCED_EXIT_CODE: i32 = 130;

/// Triggers `shutdown` on the first SIGINT or SIGTERM and exits the process
/// on the next one, even if a tick is still running.
#[cfg(unix)]
async fn watch_signals(shutdown: Shutdown) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    loop {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        on_signal(&shutdown, name);
    }
}

#[cfg(not(unix))]
async fn watch_signals(shutdown: Shutdown) -> Result<()> {
    loop {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")?;
        on_signal(&shutdown, "Ctrl+C");
    }
}

fn on_signal(shutdown: &Shutdown, name: &str) {
    if shutdown.is_triggered() {
        warn!(signal = name, "second signal received, exiting without finishing the current tick");
        std::process::exit(FORCED_EXIT_CODE);
    }
    info!(signal = name, "received signal, finishing current tick");
    shutdown.trigger();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let config = load_config(&args).context("invalid configuration")?;
    let merge_set = MergeSet::from_config(&config);

    info!(
        pairs = merge_set.pair_count(),
        aggregates = merge_set.aggregate_count(),
        threshold = %format_size(config.threshold),
        interval_secs = config.interval.as_secs(),
        sync = config.sync,
        "coalesce started"
    );

    if args.once {
        merge_set.recover().await;
        let report = merge_set.run_once().await;
        anyhow::ensure!(
            report.failed() == 0,
            "{} of {} pairs failed to merge",
            report.failed(),
            report.pairs.len()
        );
        return Ok(());
    }

    let scheduler = Scheduler::new(merge_set, config.interval)?;
    let shutdown = Shutdown::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_signals(shutdown).await {
                error!(error = %e, "signal handling unavailable");
            }
        });
    }

    let ticks = scheduler.run(shutdown).await;
    info!(ticks, "coalesce stopped");
    Ok(())
}
