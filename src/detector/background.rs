// src/detector/background.rs
//
// Background strip model. Accumulates float sums of the gate slit over the
// calibration frames, then freezes an 8-bit mean per band row for the rest
// of the session.

use tracing::info;

#[derive(Debug)]
pub struct BackgroundModel {
    accumulator: Vec<f32>,
    samples: u32,
    target_samples: u32,
    levels: Option<Vec<u8>>,
}

impl BackgroundModel {
    pub fn new(target_samples: u32) -> Self {
        Self {
            accumulator: Vec::new(),
            samples: 0,
            target_samples,
            levels: None,
        }
    }

    /// Size the accumulator for a band height and zero everything.
    pub fn begin(&mut self, band_height: usize) {
        self.accumulator = vec![0.0; band_height];
        self.samples = 0;
        self.levels = None;
    }

    /// Add one calibration slit. Returns true when the model just completed.
    pub fn accumulate(&mut self, slit: &[u8]) -> bool {
        debug_assert_eq!(slit.len(), self.accumulator.len());
        for (acc, &v) in self.accumulator.iter_mut().zip(slit) {
            *acc += v as f32;
        }
        self.samples += 1;

        if self.samples >= self.target_samples {
            let n = self.samples as f32;
            let levels: Vec<u8> = self
                .accumulator
                .iter()
                .map(|&sum| (sum / n).round().clamp(0.0, 255.0) as u8)
                .collect();
            info!(
                "✓ Background calibrated: {} rows over {} frames",
                levels.len(),
                self.samples
            );
            self.levels = Some(levels);
            return true;
        }
        false
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn is_valid(&self) -> bool {
        self.levels.is_some()
    }

    /// Frozen per-row background luma; None until calibration completes.
    pub fn levels(&self) -> Option<&[u8]> {
        self.levels.as_deref()
    }

    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.samples = 0;
        self.levels = None;
    }
}
