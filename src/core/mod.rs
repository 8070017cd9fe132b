//! Core logic: classification, rate-limited aggregation, alerting, retention.
//!
//! - [`classify`] — raw frame → normalized [`PacketRecord`]
//! - [`RateLimiter`] — global packet admission gate
//! - [`StatsStore`] — lock-guarded per-port counters, packet log, alerts
//! - [`RetentionSweeper`] — periodic port-table eviction
//! - [`local_addrs`] — host address enumeration

pub mod classify;
pub mod local_addrs;
pub mod rate_limit;
pub mod stats;
pub mod sweeper;

pub use classify::{PacketRecord, Protocol, TcpFlag};
pub use rate_limit::RateLimiter;
pub use stats::{Alert, AlertRule, NetworkSnapshot, PortStats, StatsStore};
pub use sweeper::RetentionSweeper;
