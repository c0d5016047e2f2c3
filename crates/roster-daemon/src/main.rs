//! roster-daemon: runs a session of in-process nodes and reports what each
//! of them ended up knowing about the others.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roster_core::SessionConfig;
use roster_daemon::Simulation;

#[derive(Parser, Debug)]
#[command(name = "roster-daemon")]
#[command(about = "Peer roster simulation")]
struct Args {
    /// Path to a YAML session config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes to join
    #[arg(short, long, default_value_t = 3)]
    nodes: usize,

    /// Stop after this many milliseconds (runs until Ctrl+C if omitted)
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Hand authority to the next node at this period
    #[arg(long)]
    migrate_every_ms: Option<u64>,

    /// Round-trip time reported by the hub
    #[arg(long, default_value_t = 20)]
    round_trip_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

async fn next_migration(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,roster_core=debug,roster_daemon=debug"
    } else {
        "info,roster_core=info,roster_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Stdout carries the report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            SessionConfig::from_file(path)?
        }
        None => SessionConfig::default(),
    };
    info!("Session: {}", config.session_name);

    let simulation = Simulation::start(
        config,
        args.nodes,
        Duration::from_millis(args.round_trip_ms),
    )
    .await?;

    let mut migration = args.migrate_every_ms.map(|ms| {
        let period = Duration::from_millis(ms);
        interval_at(Instant::now() + period, period)
    });
    let stop_after = deadline(args.duration_ms.map(Duration::from_millis));
    tokio::pin!(stop_after);

    info!("Running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = next_migration(&mut migration) => {
                if let Err(e) = simulation.migrate_authority() {
                    error!("Failed to migrate authority: {}", e);
                }
            }

            _ = &mut stop_after => {
                info!("Duration elapsed");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if !simulation.wait_converged(Duration::from_secs(1)).await {
        warn!("Stopping before every node converged");
    }

    let report = simulation.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
