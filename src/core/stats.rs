//! Shared traffic statistics table.
//!
//! One mutex guards the whole table: recent-packet log, per-port counters,
//! alert log, alert rules, and local addresses. Every mutation and every
//! snapshot runs under that single lock so the reporting surface can never
//! observe a torn update (bytes incremented but packets not, a half-applied
//! eviction, and so on).
//!
//! Threshold evaluation lives here too: it runs inside the same critical
//! section as the counter update that triggered it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;

use crate::config;
use crate::core::classify::PacketRecord;
use crate::error::MonitorError;

/// Traffic counters for a single observed port.
///
/// `packets_*` and `bytes_*` are monotonically non-decreasing for the
/// lifetime of the entry; `last_packets` / `alert_check_time` are the
/// threshold engine's checkpoint from the previous evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PortStats {
    pub port: u16,
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Unix seconds of the last counter update.
    pub last_updated: f64,
    /// Cumulative packet count at the previous alert check.
    pub last_packets: u64,
    /// Unix seconds of the previous alert check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_check_time: Option<f64>,
}

impl PortStats {
    fn new(port: u16, now: f64) -> Self {
        Self {
            port,
            packets_in: 0,
            packets_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            last_updated: now,
            last_packets: 0,
            alert_check_time: None,
        }
    }
}

/// A packets-per-second threshold attached to one port.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlertRule {
    pub packets_per_second: f64,
}

/// One entry in the bounded alert log.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub message: String,
}

/// Point-in-time copy of the whole table, taken under one lock acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub packets: Vec<PacketRecord>,
    pub port_stats: HashMap<u16, PortStats>,
    pub alerts: Vec<Alert>,
    pub port_alerts: HashMap<u16, AlertRule>,
    pub local_ips: Vec<String>,
}

#[derive(Debug, Default)]
struct StatsInner {
    packets: VecDeque<PacketRecord>,
    port_stats: HashMap<u16, PortStats>,
    alerts: VecDeque<Alert>,
    alert_rules: HashMap<u16, AlertRule>,
    local_ips: Vec<String>,
}

enum Direction {
    In,
    Out,
}

/// Mutation-guarded statistics table. Single source of truth for all
/// readers; shared between the capture loop, the retention sweeper, and the
/// query surface.
#[derive(Debug, Default)]
pub struct StatsStore {
    inner: Mutex<StatsInner>,
}

/// Current Unix timestamp in fractional seconds.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted packet. Called from the capture loop.
    pub fn record_packet(&self, record: PacketRecord) {
        self.record_packet_at(record, unix_now());
    }

    /// Record an admitted packet at an explicit time. The packet log, both
    /// ends' port counters, and any triggered alert are all updated in one
    /// critical section.
    pub fn record_packet_at(&self, record: PacketRecord, now: f64) {
        let size = record.size;
        let src_port = record.src_port;
        let dst_port = record.dst_port;

        let mut inner = self.inner.lock().unwrap();

        inner.packets.push_back(record);
        while inner.packets.len() > config::RECENT_PACKETS_CAP {
            inner.packets.pop_front();
        }

        // Source-port traffic leaves that port, destination-port traffic
        // arrives at it. Port 0 stands for "no real port" on non-TCP/UDP IP
        // traffic and is not tracked.
        if let Some(port) = src_port.filter(|p| *p != 0) {
            inner.record_for_port(port, Direction::Out, size, now);
        }
        if let Some(port) = dst_port.filter(|p| *p != 0) {
            inner.record_for_port(port, Direction::In, size, now);
        }
    }

    /// Append a lifecycle alert (capture start/stop/failure).
    pub fn record_alert(&self, message: impl Into<String>) {
        self.inner.lock().unwrap().push_alert(message.into());
    }

    /// Consistent point-in-time copy of the whole table.
    pub fn snapshot(&self) -> NetworkSnapshot {
        let inner = self.inner.lock().unwrap();
        NetworkSnapshot {
            packets: inner.packets.iter().cloned().collect(),
            port_stats: inner.port_stats.clone(),
            alerts: inner.alerts.iter().cloned().collect(),
            port_alerts: inner.alert_rules.clone(),
            local_ips: inner.local_ips.clone(),
        }
    }

    /// Install (or replace) the packets-per-second rule for a port.
    /// Rejects port 0 (never tracked) and non-finite or non-positive
    /// thresholds without touching any existing rule.
    pub fn set_alert_rule(&self, port: u16, packets_per_second: f64) -> Result<(), MonitorError> {
        if port == 0 {
            return Err(MonitorError::InvalidArgument(
                "port must be non-zero".into(),
            ));
        }
        if !packets_per_second.is_finite() || packets_per_second <= 0.0 {
            return Err(MonitorError::InvalidArgument(format!(
                "threshold must be a positive number, got {packets_per_second}"
            )));
        }
        self.inner
            .lock()
            .unwrap()
            .alert_rules
            .insert(port, AlertRule { packets_per_second });
        Ok(())
    }

    /// Remove the rule for a port.
    pub fn clear_alert_rule(&self, port: u16) -> Result<(), MonitorError> {
        match self.inner.lock().unwrap().alert_rules.remove(&port) {
            Some(_) => Ok(()),
            None => Err(MonitorError::NotFound(port)),
        }
    }

    /// Replace the local-address list. Refreshed at every capture start.
    pub fn set_local_ips(&self, ips: Vec<String>) {
        self.inner.lock().unwrap().local_ips = ips;
    }

    /// Evict least-recently-updated port entries down to `keep`, never
    /// touching ports that have an active alert rule. Returns the number of
    /// evicted entries. Called by the retention sweeper.
    pub fn evict_stale(&self, keep: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if inner.port_stats.len() <= keep {
            return 0;
        }

        let mut by_recency: Vec<(u16, f64)> = inner
            .port_stats
            .iter()
            .map(|(port, stats)| (*port, stats.last_updated))
            .collect();
        by_recency.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let kept: std::collections::HashSet<u16> =
            by_recency.iter().take(keep).map(|(port, _)| *port).collect();

        let StatsInner {
            port_stats,
            alert_rules,
            ..
        } = &mut *inner;
        let before = port_stats.len();
        port_stats.retain(|port, _| kept.contains(port) || alert_rules.contains_key(port));
        before - port_stats.len()
    }
}

impl StatsInner {
    fn record_for_port(&mut self, port: u16, direction: Direction, size: u64, now: f64) {
        let stats = self
            .port_stats
            .entry(port)
            .or_insert_with(|| PortStats::new(port, now));
        match direction {
            Direction::In => {
                stats.packets_in += 1;
                stats.bytes_in += size;
            }
            Direction::Out => {
                stats.packets_out += 1;
                stats.bytes_out += size;
            }
        }
        stats.last_updated = now;

        self.check_port_alert(port, now);
    }

    /// Threshold evaluation for one port. Runs only when a rule exists.
    ///
    /// The rate is measured against the previous check's checkpoint, not a
    /// fixed window: each evaluation compounds on the one before it. A
    /// second evaluation at the same instant (elapsed == 0) is a complete
    /// no-op so the checkpoint keeps accumulating until time advances.
    fn check_port_alert(&mut self, port: u16, now: f64) {
        let Some(rule) = self.alert_rules.get(&port) else {
            return;
        };
        let threshold = rule.packets_per_second;
        let Some(stats) = self.port_stats.get_mut(&port) else {
            return;
        };

        // A never-checked port defaults to a one-second window.
        let elapsed = now - stats.alert_check_time.unwrap_or(stats.last_updated - 1.0);
        if elapsed <= 0.0 {
            return;
        }

        let packets = stats.packets_in + stats.packets_out;
        let rate = packets.saturating_sub(stats.last_packets) as f64 / elapsed;
        stats.last_packets = packets;
        stats.alert_check_time = Some(now);

        if rate > threshold {
            tracing::info!(port, rate, threshold, "port exceeded packet rate threshold");
            self.push_alert(format!(
                "Port {port} exceeded packet rate threshold: {rate:.1} packets/sec"
            ));
        }
    }

    fn push_alert(&mut self, message: String) {
        self.alerts.push_back(Alert {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            message,
        });
        while self.alerts.len() > config::ALERTS_CAP {
            self.alerts.pop_front();
        }
    }
}
