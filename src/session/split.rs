// src/session/split.rs
//
// Crossing-to-clock conversion and the final split. The detector reports a
// crossing as (interpolated trigger PTS, frame PTS, uptime nanos); the
// interpolated instant lies slightly before the confirming frame, so the
// uptime reading is corrected backwards by the PTS difference. This assumes
// the camera PTS clock and the monotonic clock tick at the same rate over
// the few milliseconds involved.

use crate::types::Crossing;
use serde::Serialize;
use tracing::warn;

/// Crossing instant on the local monotonic clock:
/// `uptime + round((triggerPts − ptsSeconds) · 1e9)`.
pub fn crossing_to_uptime(crossing: &Crossing) -> i64 {
    let correction = (crossing.trigger_pts - crossing.pts_seconds) * 1e9;
    crossing.uptime_nanos + correction.round() as i64
}

/// Final race result as shown on both devices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaceOutcome {
    pub split_nanos: i64,
    pub uncertainty_ms: f64,
}

impl RaceOutcome {
    pub fn split_ms(&self) -> f64 {
        self.split_nanos as f64 / 1e6
    }

    pub fn split_seconds(&self) -> f64 {
        self.split_nanos as f64 / 1e9
    }

    /// True when the finish did not plausibly follow the start.
    pub fn is_implausible(&self) -> bool {
        self.split_nanos == 0
    }
}

/// Split between a start and finish instant in the same clock domain.
/// A finish at or before the start clamps to zero and is logged; the caller
/// surfaces that as an implausible split.
pub fn compute_split(t_start_local: i64, t_finish_local: i64) -> i64 {
    if t_finish_local >= t_start_local {
        t_finish_local - t_start_local
    } else {
        warn!(
            "Finish {} precedes start {} in the finish clock domain, clamping split to 0",
            t_finish_local, t_start_local
        );
        0
    }
}
