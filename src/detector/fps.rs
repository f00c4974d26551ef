// src/detector/fps.rs
//
// Frame-rate estimation and drop counting from PTS deltas. Keeps the last
// 30 inter-frame deltas; a delta beyond 1.5x the expected interval counts
// as a dropped frame. Drop reporting is advisory only.

use std::collections::VecDeque;

const DELTA_WINDOW: usize = 30;
const DROP_FACTOR: f64 = 1.5;

#[derive(Debug)]
pub struct FpsTracker {
    deltas: VecDeque<f64>,
    last_pts: Option<f64>,
    expected_interval: f64,
    frame_drops: u32,
}

impl FpsTracker {
    pub fn new(reference_fps: f64) -> Self {
        Self {
            deltas: VecDeque::with_capacity(DELTA_WINDOW),
            last_pts: None,
            expected_interval: 1.0 / reference_fps.max(1.0),
            frame_drops: 0,
        }
    }

    pub fn record(&mut self, pts: f64) {
        if let Some(last) = self.last_pts {
            let delta = pts - last;
            if delta > 0.0 {
                if self.deltas.len() >= DELTA_WINDOW {
                    self.deltas.pop_front();
                }
                self.deltas.push_back(delta);
                if delta > DROP_FACTOR * self.expected_interval {
                    self.frame_drops += 1;
                }
            }
        }
        self.last_pts = Some(pts);
    }

    /// Measured rate over the delta window; falls back to the configured
    /// reference before any deltas exist.
    pub fn fps(&self) -> f64 {
        let sum: f64 = self.deltas.iter().sum();
        if self.deltas.is_empty() || sum <= 0.0 {
            return 1.0 / self.expected_interval;
        }
        self.deltas.len() as f64 / sum
    }

    pub fn frame_drops(&self) -> u32 {
        self.frame_drops
    }

    pub fn reset(&mut self) {
        self.deltas.clear();
        self.last_pts = None;
        self.frame_drops = 0;
    }
}
