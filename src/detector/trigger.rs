// src/detector/trigger.rs
//
// Two-frame trigger confirmation with sub-frame interpolation, plus the
// cooldown hysteresis that gates re-arming. Occupancy must hold at or above
// the on-threshold for two consecutive frames; the crossing PTS is then
// interpolated across the threshold between the last below frame and the
// first above frame.

use tracing::debug;

/// Samples captured when occupancy first rises above the on-threshold.
#[derive(Debug, Clone, Copy)]
struct RiseSnapshot {
    r_prev: f32,
    pts_prev: f64,
    r_curr: f32,
    pts_curr: f64,
}

#[derive(Debug)]
pub struct TriggerGate {
    on_threshold: f32,
    off_threshold: f32,
    rearm_frames: u32,

    above_count: u32,
    below_count: u32,
    last_sample: Option<(f32, f64)>,
    snapshot: Option<RiseSnapshot>,
}

impl TriggerGate {
    pub fn new(on_threshold: f32, off_threshold: f32, rearm_frames: u32) -> Self {
        Self {
            on_threshold,
            off_threshold,
            rearm_frames,
            above_count: 0,
            below_count: 0,
            last_sample: None,
            snapshot: None,
        }
    }

    /// Feed one armed-state occupancy sample. Returns the interpolated
    /// crossing PTS once two consecutive frames confirm the subject.
    pub fn update(&mut self, r: f32, pts: f64) -> Option<f64> {
        let fired = if r >= self.on_threshold {
            self.above_count += 1;
            if self.above_count == 1 {
                let (r_prev, pts_prev) = self.last_sample.unwrap_or((r, pts));
                self.snapshot = Some(RiseSnapshot {
                    r_prev,
                    pts_prev,
                    r_curr: r,
                    pts_curr: pts,
                });
                None
            } else if self.above_count == 2 {
                let snap = self.snapshot.expect("snapshot captured on first rise");
                Some(interpolate_crossing(&snap, self.on_threshold))
            } else {
                None
            }
        } else {
            self.above_count = 0;
            self.snapshot = None;
            None
        };

        self.last_sample = Some((r, pts));
        fired
    }

    /// Feed one cooldown occupancy sample. Returns true when the gate has
    /// been clear long enough to re-arm.
    pub fn update_cooldown(&mut self, r: f32) -> bool {
        if r < self.off_threshold {
            self.below_count += 1;
        } else {
            self.below_count = 0;
        }
        if self.below_count >= self.rearm_frames {
            debug!(
                "Gate clear for {} frames, ready to re-arm",
                self.below_count
            );
            self.reset();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.above_count = 0;
        self.below_count = 0;
        self.last_sample = None;
        self.snapshot = None;
    }
}

/// Linear interpolation of the moment occupancy crossed the threshold.
/// Degenerate rises (no growth, or already above on the previous frame)
/// fall back to the first above-threshold frame's PTS.
fn interpolate_crossing(snap: &RiseSnapshot, threshold: f32) -> f64 {
    if snap.r_curr > snap.r_prev && snap.r_curr > threshold {
        let alpha = ((threshold - snap.r_prev) / (snap.r_curr - snap.r_prev)).clamp(0.0, 1.0);
        snap.pts_prev + alpha as f64 * (snap.pts_curr - snap.pts_prev)
    } else {
        snap.pts_curr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> TriggerGate {
        TriggerGate::new(0.20, 0.10, 5)
    }

    #[test]
    fn test_single_above_frame_does_not_fire() {
        let mut g = gate();
        assert_eq!(g.update(0.05, 1.000), None);
        assert_eq!(g.update(0.35, 1.010), None);
        // dropped back below before confirmation
        assert_eq!(g.update(0.02, 1.020), None);
        assert_eq!(g.update(0.30, 1.030), None);
    }

    #[test]
    fn test_interpolated_crossing_pts() {
        let mut g = gate();
        assert_eq!(g.update(0.05, 1.000), None);
        assert_eq!(g.update(0.35, 1.010), None);
        let fired = g.update(0.40, 1.020).expect("second above frame fires");
        // alpha = (0.20 - 0.05) / (0.35 - 0.05) = 0.5
        assert!((fired - 1.005).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_rise_uses_first_above_pts() {
        let mut g = gate();
        // previous frame already above threshold: no meaningful slope
        assert_eq!(g.update(0.50, 1.000), None);
        let fired = g.update(0.50, 1.010).unwrap();
        // snapshot had no prior sample, so prev == curr and interpolation
        // degenerates to the first above frame
        assert!((fired - 1.000).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_is_clamped() {
        // threshold below both samples: raw alpha would be negative
        let snap = RiseSnapshot {
            r_prev: 0.30,
            pts_prev: 2.000,
            r_curr: 0.60,
            pts_curr: 2.010,
        };
        let pts = interpolate_crossing(&snap, 0.20);
        assert!((pts - 2.000).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown_requires_consecutive_lows() {
        let mut g = gate();
        // 4 low + 1 high + 5 low: only the final streak counts
        for _ in 0..4 {
            assert!(!g.update_cooldown(0.02));
        }
        assert!(!g.update_cooldown(0.50));
        for i in 0..5 {
            let rearmed = g.update_cooldown(0.02);
            assert_eq!(rearmed, i == 4);
        }
    }

    #[test]
    fn test_off_threshold_is_strict() {
        let mut g = gate();
        // exactly at the off threshold does not count as clear
        for _ in 0..10 {
            assert!(!g.update_cooldown(0.10));
        }
    }

    #[test]
    fn test_reset_clears_confirmation_progress() {
        let mut g = gate();
        g.update(0.05, 1.000);
        g.update(0.35, 1.010);
        g.reset();
        // needs two fresh above frames again
        assert_eq!(g.update(0.40, 1.020), None);
        assert!(g.update(0.40, 1.030).is_some());
    }
}
