//! Time as presented to guests.
//!
//! The default clock is a counter advancing one nanosecond per query, which
//! keeps time-dependent guests replayable. Wall-clock mode is a
//! configuration switch for guests that need real timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Fake,
    Real,
}

#[derive(Debug)]
pub struct Clock {
    mode: ClockMode,
    fake_ns: AtomicU64,
}

impl Clock {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            fake_ns: AtomicU64::new(0),
        }
    }

    /// Nanoseconds since an arbitrary origin; strictly increasing in fake
    /// mode.
    pub fn now_ns(&self) -> u64 {
        match self.mode {
            ClockMode::Fake => self.fake_ns.fetch_add(1, Ordering::Relaxed),
            ClockMode::Real => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
        }
    }

    pub fn resolution_ns(&self) -> u64 {
        1
    }
}
