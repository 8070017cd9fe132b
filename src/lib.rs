//! portwatch — live per-port network traffic monitoring.
//!
//! Captures IP packets from a host interface, aggregates per-port traffic
//! counters under a single lock, and raises alerts when a monitored port
//! exceeds its configured packet rate. Rendering and route wiring are left
//! to the consumer; everything here is reachable through the [`Monitor`]
//! handle.

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod monitor;

pub use capture::{CaptureConfig, CaptureState};
pub use core::{Alert, AlertRule, NetworkSnapshot, PacketRecord, PortStats, Protocol, StatsStore};
pub use error::MonitorError;
pub use monitor::Monitor;
