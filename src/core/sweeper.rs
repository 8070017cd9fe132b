//! Periodic retention sweep over the port table.
//!
//! Runs independently of packet arrival on a fixed timer. The eviction
//! policy itself lives in [`StatsStore::evict_stale`]; this module only owns
//! the task lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::core::stats::StatsStore;

/// Handle to the background sweep task. Stopping is cooperative; the task
/// also gets aborted so tests shut down promptly.
pub struct RetentionSweeper {
    shutdown: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RetentionSweeper {
    /// Spawn the sweep task with the default 30s period. Requires a tokio
    /// runtime.
    pub fn spawn(store: Arc<StatsStore>) -> Self {
        Self::spawn_with_period(store, Duration::from_secs(config::SWEEP_INTERVAL_SECS))
    }

    /// Spawn with an explicit period. Used by tests.
    pub fn spawn_with_period(store: Arc<StatsStore>, period: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it so the first
            // real sweep happens one full period in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                let evicted = store.evict_stale(config::PORT_TABLE_KEEP);
                if evicted > 0 {
                    tracing::debug!(evicted, "retention sweep evicted stale ports");
                }
            }
        });

        Self { shutdown, handle }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}
