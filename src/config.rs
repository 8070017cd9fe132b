//! Centralized runtime constants for portwatch.
//!
//! All tunable intervals, capacities, and capture parameters are collected
//! here so they can be found and adjusted in a single place rather than
//! scattered across modules.

/// Minimum time between two admitted packets (milliseconds). Packets arriving
/// faster than this are dropped by the sampling gate, never queued.
pub const PACKET_ADMIT_INTERVAL_MS: u64 = 500;

/// Maximum number of recent packet records kept in the snapshot log.
pub const RECENT_PACKETS_CAP: usize = 20;

/// Maximum number of alerts kept in the alert log.
pub const ALERTS_CAP: usize = 5;

/// Number of most-recently-updated port entries the retention sweeper keeps.
/// Ports with an active alert rule are kept regardless.
pub const PORT_TABLE_KEEP: usize = 20;

/// Interval between retention sweeps (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// BPF filter applied to the live capture.
pub const CAPTURE_FILTER: &str = "tcp or udp";

/// Bytes captured per packet. Transport headers are all we parse, so one
/// MTU's worth is plenty.
pub const CAPTURE_SNAPLEN: i32 = 1514;

/// Read timeout on the capture handle (milliseconds). This bounds how long
/// the capture loop can go without checking its shutdown flag on an idle
/// link.
pub const CAPTURE_TIMEOUT_MS: i32 = 500;

/// Interval at which the demo binary prints a snapshot (seconds).
pub const SNAPSHOT_PRINT_INTERVAL_SECS: u64 = 5;
