//! Time sources
//!
//! Lock and unlock timestamps are whole seconds since the Unix epoch. The
//! [`Clock`] trait lets tests drive time explicitly; [`ClockGuard`] keeps
//! lock expiry honest when the wall clock steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Timestamp;

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now_seconds(&self) -> Timestamp;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump to an absolute time (may go backwards)
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Result of observing the clock through a [`ClockGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Time to use for lockout decisions
    pub now: Timestamp,
    /// Size of a backwards step beyond the tolerance, if one was seen
    pub regression: Option<u64>,
}

/// Monotonic view over a wall clock
///
/// Tracks the highest time seen (including lock times loaded from storage)
/// and never reports anything lower, so a clock set backwards cannot shorten
/// a timed lock.
#[derive(Debug, Clone)]
pub struct ClockGuard {
    high_water: Timestamp,
    tolerance: u64,
    /// Gap last reported while the clock is still behind the high-water mark
    reported_gap: Option<u64>,
}

impl ClockGuard {
    /// Create a guard that ignores backwards steps of up to `tolerance` seconds
    pub fn new(tolerance: u64) -> Self {
        Self {
            high_water: 0,
            tolerance,
            reported_gap: None,
        }
    }

    /// Raise the floor to a previously recorded timestamp
    pub fn raise_floor(&mut self, recorded: Timestamp) {
        self.high_water = self.high_water.max(recorded);
    }

    /// Highest time observed so far
    pub fn high_water(&self) -> Timestamp {
        self.high_water
    }

    /// Observe a raw clock reading.
    ///
    /// A regression is reported once when it starts, and again only if the
    /// clock falls further behind by more than the tolerance. Catching up
    /// with the high-water mark ends it.
    pub fn observe(&mut self, raw: Timestamp) -> Observation {
        if raw >= self.high_water {
            self.high_water = raw;
            self.reported_gap = None;
            return Observation {
                now: raw,
                regression: None,
            };
        }

        let gap = self.high_water - raw;
        let threshold = match self.reported_gap {
            Some(reported) => reported.saturating_add(self.tolerance),
            None => self.tolerance,
        };

        let regression = (gap > threshold).then_some(gap);
        if regression.is_some() {
            self.reported_gap = Some(gap);
        }

        Observation {
            now: self.high_water,
            regression,
        }
    }
}
