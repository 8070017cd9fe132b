//! Query/command surface for external consumers (web layer, CLI).
//!
//! One `Monitor` handle is constructed at startup and shared; it owns the
//! stats table, the capture controller, and the retention sweeper, and is
//! the only thing a frontend needs to hold.

use std::sync::{Arc, Mutex};

use crate::capture::{CaptureConfig, CaptureController, CaptureState};
use crate::core::stats::{NetworkSnapshot, StatsStore};
use crate::core::RetentionSweeper;
use crate::error::MonitorError;

pub struct Monitor {
    store: Arc<StatsStore>,
    controller: CaptureController,
    sweeper: Mutex<Option<RetentionSweeper>>,
}

impl Monitor {
    pub fn new(config: CaptureConfig) -> Self {
        let store = Arc::new(StatsStore::new());
        let controller = CaptureController::new(Arc::clone(&store), config);
        Self {
            store,
            controller,
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the retention sweeper. Requires a tokio runtime; call once
    /// after construction.
    pub fn start_background(&self) {
        let mut guard = self.sweeper.lock().unwrap();
        if guard.is_none() {
            *guard = Some(RetentionSweeper::spawn(Arc::clone(&self.store)));
        }
    }

    /// Consistent read of the full table.
    pub fn snapshot(&self) -> NetworkSnapshot {
        self.store.snapshot()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.controller.state()
    }

    pub fn start_capture(&self) -> Result<(), MonitorError> {
        self.controller.start()
    }

    pub fn stop_capture(&self) -> Result<(), MonitorError> {
        self.controller.stop()
    }

    /// Install a packets-per-second alert rule for a port. The threshold
    /// must be a positive, finite number.
    pub fn set_alert_rule(&self, port: u16, packets_per_second: f64) -> Result<(), MonitorError> {
        self.store.set_alert_rule(port, packets_per_second)
    }

    pub fn clear_alert_rule(&self, port: u16) -> Result<(), MonitorError> {
        self.store.clear_alert_rule(port)
    }

    /// Stop the sweeper and any running capture. Used for clean shutdown.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            sweeper.stop();
        }
        // NotRunning just means there was nothing to stop.
        let _ = self.controller.stop();
    }
}
