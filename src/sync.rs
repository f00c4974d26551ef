// src/sync.rs
//
// NTP-style clock synchronizer. Collects four-timestamp ping/pong samples
// against the peer, keeps a bounded window, and estimates the clock offset
// from the lowest-RTT samples: median offset, with MAD plus half the median
// RTT as the uncertainty bound.
//
// Sign convention: `remote ≈ local + offset`, so adding the offset to a
// local timestamp moves it into the remote domain and
// `convert_remote_to_local` subtracts it.

use crate::clock::MonotonicClock;
use crate::types::{SyncConfig, SyncQuality};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Uncertainty reported while fewer than the minimum samples exist.
pub const UNCERTAINTY_NOT_READY_MS: f64 = 999.0;

/// One completed ping/pong exchange. t1/t4 are initiator clock readings,
/// t2/t3 responder readings.
#[derive(Debug, Clone, Copy)]
pub struct SyncSample {
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
    pub t4: i64,
    /// Round-trip minus responder hold time; transport quality indicator
    pub rtt: i64,
    /// Estimated responder-minus-initiator clock offset
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    pub offset_nanos: i64,
    pub uncertainty_ms: f64,
    pub sample_count: usize,
    pub quality: SyncQuality,
    pub is_ready: bool,
}

pub struct ClockSync {
    clock: MonotonicClock,
    config: SyncConfig,
    samples: VecDeque<SyncSample>,
    offset_nanos: i64,
    uncertainty_ms: f64,
    is_ready: bool,
}

impl ClockSync {
    pub fn new(clock: MonotonicClock, config: SyncConfig) -> Self {
        Self {
            clock,
            config,
            samples: VecDeque::new(),
            offset_nanos: 0,
            uncertainty_ms: UNCERTAINTY_NOT_READY_MS,
            is_ready: false,
        }
    }

    pub fn now_nanos(&self) -> i64 {
        self.clock.now_nanos()
    }

    /// Responder side of a ping: t2 is captured on entry, t3 immediately
    /// before returning.
    pub fn handle_ping(&self, _t1: i64) -> (i64, i64) {
        let t2 = self.clock.now_nanos();
        let t3 = self.clock.now_nanos();
        (t2, t3)
    }

    /// Initiator side, after the pong arrived at t4. Malformed samples are
    /// rejected silently and do not advance any counter.
    pub fn add_sample(&mut self, t1: i64, t2: i64, t3: i64, t4: i64) {
        if t4 < t1 || t3 < t2 {
            debug!(
                "Rejecting sync sample: t1={} t2={} t3={} t4={}",
                t1, t2, t3, t4
            );
            return;
        }
        let rtt = (t4 - t1) - (t3 - t2);
        if rtt < 0 {
            // responder hold longer than the round trip: timestamps lie
            debug!("Rejecting sync sample with negative rtt {}", rtt);
            return;
        }
        let offset = ((t2 - t1) + (t3 - t4)) / 2;

        if self.samples.len() >= self.config.sample_window {
            self.samples.pop_front();
        }
        self.samples.push_back(SyncSample {
            t1,
            t2,
            t3,
            t4,
            rtt,
            offset,
        });
        self.recompute();
    }

    /// Re-estimate offset and uncertainty from the lowest-RTT samples.
    fn recompute(&mut self) {
        if self.samples.len() < self.config.min_samples {
            return;
        }

        let mut by_rtt: Vec<&SyncSample> = self.samples.iter().collect();
        by_rtt.sort_by_key(|s| s.rtt);

        let take = (self.config.best_fraction * by_rtt.len() as f64).ceil() as usize;
        let take = take.max(self.config.min_samples).min(by_rtt.len());
        let best = &by_rtt[..take];

        let offsets: Vec<i64> = best.iter().map(|s| s.offset).collect();
        let rtts: Vec<i64> = best.iter().map(|s| s.rtt).collect();
        let median_offset = median(&offsets);
        let median_rtt = median(&rtts);
        let deviations: Vec<i64> = offsets
            .iter()
            .map(|&o| (o - median_offset).abs())
            .collect();
        let mad = median(&deviations);

        self.offset_nanos = median_offset;
        self.uncertainty_ms = (mad as f64 + median_rtt as f64 / 2.0) / 1e6;
        let was_ready = self.is_ready;
        self.is_ready = true;
        if !was_ready {
            info!(
                "✓ Clock sync ready: offset {} ns, uncertainty {:.2} ms over {} samples",
                self.offset_nanos,
                self.uncertainty_ms,
                self.samples.len()
            );
        }
    }

    pub fn status(&self) -> SyncStatus {
        let quality = if self.is_ready {
            SyncQuality::from_uncertainty_ms(self.uncertainty_ms)
        } else {
            SyncQuality::Poor
        };
        SyncStatus {
            offset_nanos: if self.is_ready { self.offset_nanos } else { 0 },
            uncertainty_ms: if self.is_ready {
                self.uncertainty_ms
            } else {
                UNCERTAINTY_NOT_READY_MS
            },
            sample_count: self.samples.len(),
            quality,
            is_ready: self.is_ready,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.offset_nanos = 0;
        self.uncertainty_ms = UNCERTAINTY_NOT_READY_MS;
        self.is_ready = false;
    }
}

/// Map a remote-domain timestamp into the local domain using a stored
/// offset (`remote ≈ local + offset`).
pub fn convert_remote_to_local(remote_nanos: i64, offset_nanos: i64) -> i64 {
    remote_nanos - offset_nanos
}

fn median(values: &[i64]) -> i64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}
