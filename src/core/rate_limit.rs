//! Global packet admission gate.
//!
//! One gate for the whole capture path, not per port: the point is bounding
//! CPU and lock pressure under high packet rates, so a coarse sampling
//! interval is intentional. Owned by the single capture loop, so it needs no
//! internal lock.

use std::time::{Duration, Instant};

use crate::config;

/// Decides whether the current packet is admitted into aggregation.
///
/// A packet is admitted iff at least `interval` has passed since the last
/// admission. Rejections leave the stored instant untouched, so there is no
/// catch-up burst after a quiet period.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    /// Admit or reject a packet arriving now.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Admit or reject a packet arriving at `now`. The first packet is
    /// always admitted.
    pub fn admit_at(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(config::PACKET_ADMIT_INTERVAL_MS))
    }
}
