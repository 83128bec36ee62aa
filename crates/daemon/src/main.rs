use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rhd_daemon::cli::Cli;
use rhd_daemon::config::{load_config, DaemonConfig};
use rhd_daemon::session::{bring_up, spawn_acquisition, wait_for_shutdown, Shutdown};
use rhd_sensor::mock_board::MockBoard;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rhd_daemon=info,boards=info,rhd_sensor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DaemonConfig::default(),
    };
    cli.apply(&mut config);

    if !cli.mock {
        bail!("No USB transport is built into this daemon, run with --mock to use the emulated board");
    }
    tracing::info!("Using the emulated Rhythm board");
    let transport = MockBoard::new(config.mock.clone());

    let board = bring_up(transport, &config.acquisition, config.scan_ports)?;

    // SIGINT and SIGTERM
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).context("Error setting Ctrl-C handler")?;

    let stop = Arc::new(AtomicBool::new(false));
    let acquisition = spawn_acquisition(board, &config, stop.clone())?;

    let deadline = cli
        .seconds
        .filter(|s| s.is_finite())
        .map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    if wait_for_shutdown(&acquisition, &interrupted, deadline) == Shutdown::Interrupted {
        tracing::info!("Shutdown signal received. Stopping acquisition...");
    }
    stop.store(true, Ordering::Relaxed);

    let stats = acquisition
        .join()
        .map_err(|_| anyhow::anyhow!("Acquisition thread panicked"))??;
    tracing::info!(
        "Acquisition finished: {} periods, {} xruns, {} delayed, {} skipped",
        stats.cycles,
        stats.xruns,
        stats.delayed_cycles,
        stats.null_cycles
    );
    Ok(())
}
