// src/clock.rs
//
// Monotonic nanosecond clock shared by the detector, the synchronizer, and
// the session. Anchored at an Instant so it never runs backwards and is
// unaffected by wall-clock adjustments. Resolution is whatever Instant
// provides (sub-microsecond on every supported platform).

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    /// Fixed nanoseconds added to every reading. Zero in production; the
    /// two-device simulation uses it to model disagreeing device clocks.
    skew_nanos: i64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            skew_nanos: 0,
        }
    }

    /// Clock whose readings are `skew_nanos` ahead of a plain clock anchored
    /// at the same instant.
    pub fn with_skew(skew_nanos: i64) -> Self {
        Self {
            origin: Instant::now(),
            skew_nanos,
        }
    }

    /// Monotonic nanoseconds since the clock was created.
    pub fn now_nanos(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64 + self.skew_nanos
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
