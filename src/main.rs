//! File Cache sweep daemon
//!
//! Keeps a cache root clean by sweeping expired entries on a fixed interval.
//! Run with `--once` to sweep a single time and exit.

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_cache::cache::SweepReport;
use file_cache::{CacheConfig, FileCache};

/// Main entry point for the sweep daemon.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache root, which starts the background sweeper
/// 4. Run an initial sweep (and exit here with `--once`)
/// 5. Stop the sweeper on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: default_lifetime={:?}, max_lifetime={:?}, sweep_interval={:?}",
        config.default_lifetime, config.max_lifetime, config.sweep_interval
    );

    let cache = FileCache::open(config).context("failed to open cache root")?;
    info!("Cache root: {}", cache.root().display());
    if once {
        cache.stop_sweeper();
    }

    let sweep_cache = cache.clone();
    let report = tokio::task::spawn_blocking(move || sweep_cache.remove_expired())
        .await
        .context("initial sweep panicked")??;
    log_report(report.as_ref());

    if once {
        return Ok(());
    }

    if !cache.sweeper_running() {
        bail!("sweep interval is zero, nothing to do (use --once for a single sweep)");
    }

    shutdown_signal().await;

    cache.stop_sweeper();
    warn!("Sweeper stopped");

    let stats = cache.stats();
    info!(
        "Shutdown complete: {} sweeps removed {} expired and {} corrupt entries",
        stats.sweeps, stats.swept, stats.corrupt_removed
    );
    Ok(())
}

fn log_report(report: Option<&SweepReport>) {
    match report {
        Some(report) => info!(
            "Sweep removed {} expired, {} corrupt, {} orphaned of {} entries",
            report.removed, report.corrupt, report.orphans_removed, report.scanned
        ),
        None => info!("Sweep skipped, another sweep is running"),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
