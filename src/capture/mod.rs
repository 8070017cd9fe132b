//! Capture lifecycle and the per-frame pipeline.
//!
//! The capture loop runs on a dedicated thread and drives, for every frame:
//! classify → admission gate → stats update (which evaluates alerts). It is
//! the single producer for the stats table. Cancellation is cooperative: the
//! loop checks its shutdown flag at every iteration, and the frame source is
//! required to return within a bounded time so a quiet link cannot delay
//! shutdown indefinitely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use pcap::{Active, Capture, Device};

use crate::config;
use crate::core::classify;
use crate::core::local_addrs;
use crate::core::stats::StatsStore;
use crate::core::RateLimiter;
use crate::error::MonitorError;

/// Packet capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Interface name (`None` selects the default device).
    pub interface: Option<String>,
    /// Bytes captured per packet.
    pub snaplen: i32,
    /// Read timeout in milliseconds; bounds the shutdown-poll latency.
    pub timeout_ms: i32,
    /// BPF filter string.
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            snaplen: config::CAPTURE_SNAPLEN,
            timeout_ms: config::CAPTURE_TIMEOUT_MS,
            filter: config::CAPTURE_FILTER.to_string(),
        }
    }
}

/// Capture lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Running,
    /// Stop requested, loop has not observed it yet.
    Stopping,
}

/// A bounded-wait source of captured frames.
///
/// `next_frame` returns `Ok(None)` on a read timeout so the loop can re-check
/// its shutdown flag on idle links. Production uses a pcap handle; tests
/// drive the loop with scripted frames.
pub(crate) trait FrameSource {
    fn linktype(&self) -> i32;
    fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Live pcap capture restricted to TCP/UDP traffic.
struct PcapSource {
    capture: Capture<Active>,
    linktype: i32,
}

impl PcapSource {
    fn open(config: &CaptureConfig) -> anyhow::Result<Self> {
        let device = match &config.interface {
            Some(name) => Device::list()
                .context("failed to list capture devices")?
                .into_iter()
                .find(|d| &d.name == name)
                .ok_or_else(|| anyhow!("capture device {name} not found"))?,
            None => Device::lookup()
                .context("failed to look up default capture device")?
                .ok_or_else(|| anyhow!("no default capture device"))?,
        };
        let name = device.name.clone();

        let mut capture = Capture::from_device(device)
            .with_context(|| format!("failed to create capture on {name}"))?
            .promisc(true)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()
            .with_context(|| format!("failed to open capture on {name}"))?;
        capture
            .filter(&config.filter, true)
            .with_context(|| format!("failed to apply filter {:?}", config.filter))?;

        let linktype = capture.get_datalink().0;
        tracing::info!(device = %name, linktype, "capture opened");
        Ok(Self { capture, linktype })
    }
}

impl FrameSource for PcapSource {
    fn linktype(&self) -> i32 {
        self.linktype
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e).context("capture read failed"),
        }
    }
}

/// The per-frame pipeline. Runs until the shutdown flag is raised or the
/// source fails.
pub(crate) fn run_capture_loop(
    source: &mut dyn FrameSource,
    limiter: &mut RateLimiter,
    store: &StatsStore,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let linktype = source.linktype();
    while !shutdown.load(Ordering::Relaxed) {
        let Some(frame) = source.next_frame()? else {
            // Poll timeout on an idle link; loop around to the shutdown check.
            continue;
        };
        // Consult the gate before parsing: under high packet rates the
        // sampled-out majority must not pay classification cost.
        if !limiter.admit() {
            // Sampled out. Deliberate, not a failure; no retry.
            continue;
        }
        store.record_packet(classify::classify_packet(linktype, &frame));
    }
    Ok(())
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Opens a frame source for a freshly started capture. Runs on the loop
/// thread so open failures surface as capture alerts, not `start()` errors.
pub(crate) type SourceFactory =
    Box<dyn Fn(&CaptureConfig) -> anyhow::Result<Box<dyn FrameSource + Send>> + Send + Sync>;

/// Orchestrates the capture lifecycle: IDLE → RUNNING → STOPPING → IDLE.
///
/// The transition back to IDLE happens when the loop thread itself exits,
/// asynchronously relative to `stop()` returning.
pub struct CaptureController {
    store: Arc<StatsStore>,
    config: CaptureConfig,
    source_factory: Arc<SourceFactory>,
    worker: Mutex<Option<Worker>>,
}

impl CaptureController {
    pub fn new(store: Arc<StatsStore>, config: CaptureConfig) -> Self {
        Self::with_source_factory(
            store,
            config,
            Box::new(|config| {
                Ok(Box::new(PcapSource::open(config)?) as Box<dyn FrameSource + Send>)
            }),
        )
    }

    /// Construct with an explicit frame-source factory. Lifecycle tests use
    /// this to drive the controller without capture privileges.
    pub(crate) fn with_source_factory(
        store: Arc<StatsStore>,
        config: CaptureConfig,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            store,
            config,
            source_factory: Arc::new(source_factory),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CaptureState {
        let guard = self.worker.lock().unwrap();
        match guard.as_ref() {
            None => CaptureState::Idle,
            Some(worker) if worker.done.load(Ordering::Relaxed) => CaptureState::Idle,
            Some(worker) if worker.shutdown.load(Ordering::Relaxed) => CaptureState::Stopping,
            Some(_) => CaptureState::Running,
        }
    }

    /// Start the capture loop. Refreshes the local-address list, records a
    /// lifecycle alert, and spawns the loop thread. A capture failure inside
    /// the thread (device open, permissions, read error) is recorded as an
    /// alert and drops the controller back to idle.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut guard = self.worker.lock().unwrap();
        if let Some(worker) = guard.as_ref() {
            if !worker.done.load(Ordering::Relaxed) {
                return Err(MonitorError::AlreadyRunning);
            }
        }
        // Reap the previous loop thread, if any.
        if let Some(worker) = guard.take() {
            let _ = worker.thread.join();
        }

        self.store.set_local_ips(local_addrs::local_ip_addresses());

        let shutdown = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let store = Arc::clone(&self.store);
        let capture_config = self.config.clone();
        let source_factory = Arc::clone(&self.source_factory);
        let loop_shutdown = Arc::clone(&shutdown);
        let loop_done = Arc::clone(&done);

        let thread = std::thread::Builder::new()
            .name("capture-sniff".into())
            .spawn(move || {
                let result = source_factory(&capture_config).and_then(|mut source| {
                    let mut limiter = RateLimiter::default();
                    run_capture_loop(source.as_mut(), &mut limiter, &store, &loop_shutdown)
                });
                if let Err(e) = result {
                    tracing::error!("capture loop exited: {e:#}");
                    store.record_alert(format!("Packet capture error: {e:#}"));
                }
                loop_done.store(true, Ordering::Relaxed);
            })
            .map_err(|e| MonitorError::Capture(e.to_string()))?;

        *guard = Some(Worker {
            shutdown,
            done,
            thread,
        });
        self.store.record_alert("Packet capture started");
        tracing::info!("packet capture started");
        Ok(())
    }

    /// Request capture shutdown. The loop observes the flag at its next
    /// frame poll, within the source's read timeout.
    pub fn stop(&self) -> Result<(), MonitorError> {
        let guard = self.worker.lock().unwrap();
        match guard.as_ref() {
            Some(worker) if !worker.done.load(Ordering::Relaxed) => {
                if !worker.shutdown.swap(true, Ordering::Relaxed) {
                    self.store.record_alert("Packet capture stopped");
                    tracing::info!("packet capture stop requested");
                }
                Ok(())
            }
            _ => Err(MonitorError::NotRunning),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Ok(guard) = self.worker.lock() {
            if let Some(worker) = guard.as_ref() {
                worker.shutdown.store(true, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::Protocol;
    use std::collections::VecDeque;
    use std::time::Duration;

    const DLT_RAW: i32 = 12;

    /// Raw-IP frame source driven by a script. Raises the shared shutdown
    /// flag once the script is exhausted so the loop terminates.
    struct ScriptedSource {
        frames: VecDeque<Vec<u8>>,
        fail_at_end: bool,
        shutdown: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn linktype(&self) -> i32 {
            DLT_RAW
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_at_end => Err(anyhow!("device went away")),
                None => {
                    self.shutdown.store(true, Ordering::Relaxed);
                    Ok(None)
                }
            }
        }
    }

    /// Minimal raw IPv4 UDP frame with the given destination port.
    fn udp_frame(dst_port: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; 28];
        pkt[0] = 0x45;
        pkt[3] = 28;
        pkt[9] = 17; // UDP
        pkt[22] = (dst_port >> 8) as u8;
        pkt[23] = (dst_port & 0xFF) as u8;
        pkt
    }

    fn open_gate() -> RateLimiter {
        RateLimiter::new(Duration::ZERO)
    }

    #[test]
    fn test_pipeline_records_admitted_frames() {
        let store = StatsStore::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource {
            frames: (0..3).map(|i| udp_frame(8000 + i)).collect(),
            fail_at_end: false,
            shutdown: Arc::clone(&shutdown),
        };
        let mut limiter = open_gate();

        run_capture_loop(&mut source, &mut limiter, &store, &shutdown).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.packets.len(), 3);
        assert_eq!(snap.packets[0].protocol, Protocol::Udp);
        assert!(snap.port_stats.contains_key(&8000));
        assert!(snap.port_stats.contains_key(&8002));
    }

    #[test]
    fn test_pipeline_samples_through_the_gate() {
        let store = StatsStore::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource {
            frames: (0..10).map(|_| udp_frame(9000)).collect(),
            fail_at_end: false,
            shutdown: Arc::clone(&shutdown),
        };
        // Interval far longer than the test: only the first frame passes.
        let mut limiter = RateLimiter::new(Duration::from_secs(3600));

        run_capture_loop(&mut source, &mut limiter, &store, &shutdown).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.packets.len(), 1);
        assert_eq!(snap.port_stats[&9000].packets_in, 1);
    }

    #[test]
    fn test_pipeline_propagates_source_failure() {
        let store = StatsStore::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource {
            frames: std::iter::once(udp_frame(7000)).collect(),
            fail_at_end: true,
            shutdown: Arc::clone(&shutdown),
        };
        let mut limiter = open_gate();

        let err = run_capture_loop(&mut source, &mut limiter, &store, &shutdown).unwrap_err();
        assert!(err.to_string().contains("device went away"));
        // The frame before the failure was still recorded.
        assert_eq!(store.snapshot().packets.len(), 1);
    }

    #[test]
    fn test_raised_flag_stops_loop_before_reading() {
        let store = StatsStore::new();
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut source = ScriptedSource {
            frames: (0..5).map(|_| udp_frame(6000)).collect(),
            fail_at_end: false,
            shutdown: Arc::clone(&shutdown),
        };
        let mut limiter = open_gate();

        run_capture_loop(&mut source, &mut limiter, &store, &shutdown).unwrap();
        assert!(store.snapshot().packets.is_empty());
    }

    #[test]
    fn test_stop_on_idle_controller_is_not_running() {
        let controller =
            CaptureController::new(Arc::new(StatsStore::new()), CaptureConfig::default());
        assert_eq!(controller.state(), CaptureState::Idle);

        let err = controller.stop().unwrap_err();
        assert_eq!(err.kind(), "NotRunning");
    }

    use std::sync::atomic::AtomicUsize;

    /// Frame source that never produces a frame: every poll counts, sleeps,
    /// and times out, like a quiet interface.
    struct IdleSource {
        per_poll: Duration,
        polls: Arc<AtomicUsize>,
    }

    impl FrameSource for IdleSource {
        fn linktype(&self) -> i32 {
            DLT_RAW
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(self.per_poll);
            Ok(None)
        }
    }

    fn idle_controller(
        store: Arc<StatsStore>,
        per_poll: Duration,
        polls: Arc<AtomicUsize>,
    ) -> CaptureController {
        CaptureController::with_source_factory(
            store,
            CaptureConfig::default(),
            Box::new(move |_| {
                Ok(Box::new(IdleSource {
                    per_poll,
                    polls: Arc::clone(&polls),
                }) as Box<dyn FrameSource + Send>)
            }),
        )
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn alert_count(store: &StatsStore, needle: &str) -> usize {
        store
            .snapshot()
            .alerts
            .iter()
            .filter(|a| a.message.contains(needle))
            .count()
    }

    #[test]
    fn test_second_start_returns_already_running() {
        let store = Arc::new(StatsStore::new());
        let polls = Arc::new(AtomicUsize::new(0));
        let controller = idle_controller(
            Arc::clone(&store),
            Duration::from_millis(10),
            Arc::clone(&polls),
        );

        controller.start().unwrap();
        assert_eq!(controller.state(), CaptureState::Running);

        let err = controller.start().unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
        // The refused start leaves the running capture untouched.
        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(alert_count(&store, "Packet capture started"), 1);

        controller.stop().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            controller.state() == CaptureState::Idle
        }));
    }

    #[test]
    fn test_stop_transitions_through_stopping_to_idle() {
        let store = Arc::new(StatsStore::new());
        let polls = Arc::new(AtomicUsize::new(0));
        let controller = idle_controller(
            Arc::clone(&store),
            Duration::from_millis(100),
            Arc::clone(&polls),
        );

        controller.start().unwrap();
        // Wait for the loop to enter its first (sleeping) poll so the stop
        // request cannot be observed instantaneously.
        assert!(wait_until(Duration::from_secs(2), || {
            polls.load(Ordering::Relaxed) > 0
        }));

        controller.stop().unwrap();
        assert_eq!(controller.state(), CaptureState::Stopping);
        assert_eq!(alert_count(&store, "Packet capture stopped"), 1);

        // A second stop during STOPPING is accepted without a duplicate
        // lifecycle alert.
        controller.stop().unwrap();
        assert_eq!(alert_count(&store, "Packet capture stopped"), 1);

        // The loop observes the flag at its next poll and exits.
        assert!(wait_until(Duration::from_secs(2), || {
            controller.state() == CaptureState::Idle
        }));

        // A fresh start reaps the finished worker and runs again.
        controller.start().unwrap();
        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(alert_count(&store, "Packet capture started"), 2);
        controller.stop().unwrap();
    }

    #[test]
    fn test_source_failure_records_alert_and_returns_to_idle() {
        let store = Arc::new(StatsStore::new());
        let controller = CaptureController::with_source_factory(
            Arc::clone(&store),
            CaptureConfig::default(),
            Box::new(|_| Err(anyhow!("permission denied"))),
        );

        controller.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            controller.state() == CaptureState::Idle
        }));

        assert_eq!(alert_count(&store, "Packet capture error"), 1);
        assert_eq!(alert_count(&store, "permission denied"), 1);
        assert_eq!(controller.stop().unwrap_err().kind(), "NotRunning");

        // The controller recovers: a later start is accepted again.
        controller.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            controller.state() == CaptureState::Idle
        }));
    }
}
