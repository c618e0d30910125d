//! Rate limiting for consumer-facing events
//!
//! [`EmissionThrottle`] gates on wall time since the last emission;
//! [`SampledCounter`] lets through one report out of every N occurrences.

use std::time::{Duration, Instant};

/// Allows an emission once more than `min_interval` has passed since the
/// previous one
#[derive(Debug, Clone, Default)]
pub struct EmissionThrottle {
    last: Option<Instant>,
}

impl EmissionThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records the emission if one is allowed at `now`
    ///
    /// The first call always passes.
    pub fn try_emit(&mut self, now: Instant, min_interval: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) <= min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Counts occurrences and reports the 1st, (N+1)th, (2N+1)th, ...
#[derive(Debug, Clone)]
pub struct SampledCounter {
    count: u64,
    every: u64,
}

impl SampledCounter {
    /// `every` of zero is treated as one (report everything)
    pub fn new(every: u64) -> Self {
        Self {
            count: 0,
            every: every.max(1),
        }
    }

    /// Count one occurrence; returns `true` if this one should be reported
    pub fn record(&mut self) -> bool {
        self.count += 1;
        (self.count - 1) % self.every == 0
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
