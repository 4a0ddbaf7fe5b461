//! Expiry Sweeper Task
//!
//! Background task that periodically removes expired cache entries from disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::current_timestamp_ms;
use crate::cache::store::EntryStore;

// == Sweeper Handle ==
/// Controls a running sweeper.
///
/// Dropping the handle stops the task, the same as [`stop`](Self::stop).
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
    paused: Arc<AtomicBool>,
}

impl SweeperHandle {
    /// Skips sweeps until [`resume`](Self::resume) is called. A sweep
    /// already running finishes normally.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stops the timer. An in-flight sweep on the blocking pool runs to
    /// completion.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a background task that sweeps `store` every `interval`.
///
/// Returns `None` when `interval` is zero, which disables sweeping. The first
/// sweep runs one interval after spawning. Each sweep runs on the blocking
/// pool and the next tick waits for it, so sweeps never overlap.
///
/// # Example
/// ```ignore
/// let store = Arc::new(EntryStore::open("/tmp/cache", Duration::from_secs(3600))?);
/// let sweeper = spawn_sweeper(store, Duration::from_secs(60));
/// // Dropping the handle during shutdown stops it
/// drop(sweeper);
/// ```
pub fn spawn_sweeper(store: Arc<EntryStore>, interval: Duration) -> Option<SweeperHandle> {
    if interval.is_zero() {
        debug!("Sweeper disabled for {}", store.root().display());
        return None;
    }

    let paused = Arc::new(AtomicBool::new(false));
    let task_paused = paused.clone();

    let task = tokio::spawn(async move {
        info!(
            "Starting expiry sweeper for {} with interval of {:?}",
            store.root().display(),
            interval
        );

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if task_paused.load(Ordering::Acquire) {
                debug!("Sweeper paused, skipping sweep");
                continue;
            }

            let sweep_store = store.clone();
            let outcome =
                tokio::task::spawn_blocking(move || sweep_store.sweep(current_timestamp_ms()))
                    .await;

            match outcome {
                Ok(Ok(Some(report))) => {
                    if report.removed > 0 || report.corrupt > 0 || report.orphans_removed > 0 {
                        info!(
                            "Expiry sweep: removed {} expired, {} corrupt, {} orphaned of {}",
                            report.removed, report.corrupt, report.orphans_removed, report.scanned
                        );
                    } else {
                        debug!("Expiry sweep: no expired entries among {}", report.scanned);
                    }
                    if report.failures > 0 {
                        warn!("Expiry sweep: {} entries could not be handled", report.failures);
                    }
                }
                Ok(Ok(None)) => debug!("Expiry sweep skipped, another sweep is running"),
                Ok(Err(e)) => warn!("Expiry sweep failed: {}", e),
                Err(e) => warn!("Expiry sweep task failed: {}", e),
            }
        }
    });

    Some(SweeperHandle { task, paused })
}
