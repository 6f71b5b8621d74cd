//! Timestamps and clock sources.
//!
//! Overlay entries and rebuild purge points are compared as wall-clock
//! seconds with sub-second precision. All code reads time through a
//! [`Clock`] so tests can drive it by hand.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Seconds since the Unix epoch, with fractional precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Create a timestamp from seconds since the epoch.
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    /// Seconds since the epoch.
    pub const fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Add a duration to this timestamp.
    pub fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration.as_secs_f64())
    }

    /// Check if this timestamp is at or before the given point.
    pub fn is_at_or_before(self, other: Timestamp) -> bool {
        self.0 <= other.0
    }

    /// Duration from `earlier` to this timestamp, zero if negative.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::try_from_secs_f64(self.0 - earlier.0).unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Timestamp(secs)
    }
}

/// Hand-driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given time.
    pub fn new(start: Timestamp) -> Self {
        Self {
            bits: AtomicU64::new(start.0.to_bits()),
        }
    }

    /// Move the clock to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.bits.store(now.0.to_bits(), Ordering::Release);
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        let next = self.now().add(by);
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(f64::from_bits(self.bits.load(Ordering::Acquire)))
    }
}
