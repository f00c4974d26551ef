// src/detector/mod.rs
//
// Slit-scan gate crossing detector. Per-frame state machine:
//
//   idle -> calibrating -> armed -> triggered -> cooldown -> armed
//
// Calibration freezes a background strip at the gate column; while armed,
// each frame's occupancy feeds the two-frame trigger; a confirmed crossing
// collects a post-trigger window and assembles the photo-finish composite;
// cooldown holds re-arming until the gate has been clear long enough.

pub mod background;
pub mod band;
pub mod composite;
pub mod export;
pub mod fps;
pub mod occupancy;
pub mod ring;
pub mod trigger;

use crate::clock::MonotonicClock;
use crate::error::RaceError;
use crate::types::{Crossing, DetectorConfig, DetectorState, LumaFrame};
use self::background::BackgroundModel;
use self::band::BandGeometry;
use self::export::DebugExport;
use self::fps::FpsTracker;
use self::ring::{DebugFrameBuffer, SlitRing, SlitSample};
use self::trigger::TriggerGate;
use image::GrayImage;
use std::path::PathBuf;
use tracing::{info, warn};

/// Per-frame result of `process`.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub r: f32,
    pub crossed: bool,
    pub state_name: &'static str,
    pub elapsed_seconds: f64,
    pub fps: f64,
    pub frame_drops: u32,
    /// Normalized y positions of foreground rows, for overlay rendering
    pub detection_points: Vec<f32>,
    pub post_trigger_count: u32,
    pub post_trigger_total: u32,
    /// Set on the frame that confirmed the crossing
    pub crossing: Option<Crossing>,
    /// True on the frame that completed the composite
    pub composite_ready: bool,
}

impl FrameReport {
    fn inactive(state: DetectorState) -> Self {
        Self {
            state_name: state.as_str(),
            ..Default::default()
        }
    }
}

/// Progress report from one `calibrate` call.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationProgress {
    pub samples: u32,
    pub target: u32,
    pub complete: bool,
}

pub struct GateDetector {
    config: DetectorConfig,
    clock: MonotonicClock,
    state: DetectorState,
    line_x: f64,

    geometry: Option<BandGeometry>,
    background: BackgroundModel,
    trigger: TriggerGate,
    ring: SlitRing,
    debug: DebugFrameBuffer,
    fps: FpsTracker,

    session_start_pts: f64,
    post_trigger_count: u32,
    post_trigger_total: u32,
    composite_slits: Vec<SlitSample>,
    composite: Option<GrayImage>,
    crossing: Option<Crossing>,
    trigger_frame: Option<(Vec<u8>, f64)>,
    trigger_debug_id: Option<u64>,
    export_dir: PathBuf,
}

impl GateDetector {
    pub fn new(config: DetectorConfig, clock: MonotonicClock) -> Self {
        let line_x = band::clamp_line_x(config.line_x);
        let ring_capacity = (0.5 * config.reference_fps).ceil() as usize;
        Self {
            trigger: TriggerGate::new(config.trigger_on, config.trigger_off, config.rearm_frames),
            background: BackgroundModel::new(config.calibration_frames),
            ring: SlitRing::new(ring_capacity),
            debug: DebugFrameBuffer::new(config.debug_buffer_frames),
            fps: FpsTracker::new(config.reference_fps),
            clock,
            state: DetectorState::Idle,
            line_x,
            geometry: None,
            session_start_pts: 0.0,
            post_trigger_count: 0,
            post_trigger_total: 0,
            composite_slits: Vec::new(),
            composite: None,
            crossing: None,
            trigger_frame: None,
            trigger_debug_id: None,
            export_dir: std::env::temp_dir(),
            config,
        }
    }

    /// Directory composites and debug dumps are written into. Defaults to
    /// the process temp directory.
    pub fn set_export_dir(&mut self, dir: impl Into<PathBuf>) {
        self.export_dir = dir.into();
    }

    /// Move the gate line. Clamped to [0.1, 0.9]; valid in any state and
    /// idempotent.
    pub fn configure(&mut self, line_x: f64) {
        self.line_x = band::clamp_line_x(line_x);
    }

    pub fn line_x(&self) -> f64 {
        self.line_x
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn last_crossing(&self) -> Option<Crossing> {
        self.crossing
    }

    /// Raw pixel buffer of the frame that confirmed the crossing, with its
    /// PTS. Held until the next `arm` or `reset`.
    pub fn trigger_frame(&self) -> Option<(&[u8], f64)> {
        self.trigger_frame
            .as_ref()
            .map(|(data, pts)| (data.as_slice(), *pts))
    }

    /// Latch frame dimensions, size every band buffer, and enter
    /// calibration. Restarting an in-progress calibration is allowed.
    pub fn start_calibration(&mut self, frame: &LumaFrame) -> Result<(), RaceError> {
        match self.state {
            DetectorState::Idle | DetectorState::Calibrating => {}
            s => return Err(RaceError::wrong_state("start_calibration", s)),
        }
        validate_dimensions(frame)?;

        let geometry = BandGeometry::from_dimensions(frame.width, frame.height);
        self.background.begin(geometry.band_height());
        self.geometry = Some(geometry);
        self.state = DetectorState::Calibrating;
        info!(
            "Calibration started: {}x{}, band rows {}..{}",
            frame.width, frame.height, geometry.band_top, geometry.band_bottom
        );
        Ok(())
    }

    /// Accumulate one background sample. Completes after the configured
    /// number of frames and drops back to idle, ready to arm.
    pub fn calibrate(&mut self, frame: &LumaFrame) -> Result<CalibrationProgress, RaceError> {
        if self.state != DetectorState::Calibrating {
            return Err(RaceError::wrong_state("calibrate", self.state));
        }
        let geometry = self.geometry.ok_or(RaceError::NotCalibrated)?;
        if !geometry.accepts(frame) {
            return Err(dimension_error(frame, &geometry));
        }

        let slit = band::extract_slit(frame, &geometry, geometry.gate_pixel(self.line_x));
        let complete = self.background.accumulate(&slit);
        if complete {
            self.state = DetectorState::Idle;
        }
        Ok(CalibrationProgress {
            samples: self.background.samples(),
            target: self.config.calibration_frames,
            complete,
        })
    }

    /// Begin watching for a crossing. Requires a completed background model.
    pub fn arm(&mut self, frame: &LumaFrame) -> Result<(), RaceError> {
        if !self.background.is_valid() {
            return Err(RaceError::NotCalibrated);
        }
        match self.state {
            DetectorState::Idle | DetectorState::Armed | DetectorState::Cooldown => {}
            s => return Err(RaceError::wrong_state("arm", s)),
        }
        let geometry = self.geometry.ok_or(RaceError::NotCalibrated)?;
        if !geometry.accepts(frame) {
            return Err(dimension_error(frame, &geometry));
        }

        self.session_start_pts = frame.pts;
        self.ring.clear();
        self.debug.clear();
        self.fps.reset();
        self.trigger.reset();
        self.post_trigger_count = 0;
        self.post_trigger_total = 0;
        self.composite_slits.clear();
        self.composite = None;
        self.crossing = None;
        self.trigger_frame = None;
        self.trigger_debug_id = None;
        self.state = DetectorState::Armed;
        info!("✓ Armed at pts {:.3}s, gate x {:.2}", frame.pts, self.line_x);
        Ok(())
    }

    /// Main per-frame routine. Outside the active states this returns a
    /// zero-valued report carrying the current state name.
    pub fn process(&mut self, frame: &LumaFrame) -> Result<FrameReport, RaceError> {
        match self.state {
            DetectorState::Armed | DetectorState::Triggered | DetectorState::Cooldown => {}
            s => return Ok(FrameReport::inactive(s)),
        }
        let geometry = self.geometry.ok_or(RaceError::NotCalibrated)?;
        if !geometry.accepts(frame) {
            return Err(dimension_error(frame, &geometry));
        }
        let bg = match self.background.levels() {
            Some(levels) => levels,
            None => return Err(RaceError::NotCalibrated),
        };

        self.fps.record(frame.pts);
        let gate_x = geometry.gate_pixel(self.line_x);
        let slit = band::extract_slit(frame, &geometry, gate_x);
        let occ = occupancy::measure(
            &slit,
            bg,
            self.config.diff_threshold,
            self.config.min_run_px,
            geometry.band_top,
            geometry.height,
        );

        self.ring.push(slit.clone(), frame.pts);
        let debug_id = self
            .debug
            .push(&frame.data, frame.width, frame.height, frame.pts, occ.r);

        let mut crossed = false;
        let mut crossing = None;
        let mut composite_ready = false;

        match self.state {
            DetectorState::Armed => {
                if let Some(trigger_pts) = self.trigger.update(occ.r, frame.pts) {
                    let event = Crossing {
                        trigger_pts,
                        pts_seconds: frame.pts,
                        uptime_nanos: self.clock.now_nanos(),
                    };
                    self.crossing = Some(event);
                    crossing = Some(event);
                    crossed = true;
                    self.trigger_frame = Some((frame.data.clone(), frame.pts));
                    self.trigger_debug_id = Some(debug_id);
                    self.post_trigger_count = 0;
                    self.post_trigger_total = ((0.5 * self.fps.fps()).floor() as u32).max(1);
                    self.composite_slits = self.ring.snapshot();
                    self.state = DetectorState::Triggered;
                    info!(
                        "🏁 Crossing confirmed: trigger pts {:.4}s (frame pts {:.4}s), collecting {} post-trigger frames",
                        trigger_pts, frame.pts, self.post_trigger_total
                    );
                }
            }
            DetectorState::Triggered => {
                self.post_trigger_count += 1;
                self.composite_slits.push(SlitSample {
                    luma: slit,
                    pts: frame.pts,
                });
                if self.post_trigger_count >= self.post_trigger_total {
                    self.composite =
                        composite::assemble(&self.composite_slits, geometry.band_height());
                    composite_ready = self.composite.is_some();
                    self.state = DetectorState::Cooldown;
                    info!(
                        "Post-trigger window complete ({} slits), cooling down",
                        self.composite_slits.len()
                    );
                }
            }
            DetectorState::Cooldown => {
                if self.trigger.update_cooldown(occ.r) {
                    self.state = DetectorState::Armed;
                    info!("✓ Gate clear, re-armed");
                }
            }
            _ => {}
        }

        Ok(FrameReport {
            r: occ.r,
            crossed,
            state_name: self.state.as_str(),
            elapsed_seconds: frame.pts - self.session_start_pts,
            fps: self.fps.fps(),
            frame_drops: self.fps.frame_drops(),
            detection_points: occ.detection_points,
            post_trigger_count: self.post_trigger_count,
            post_trigger_total: self.post_trigger_total,
            crossing,
            composite_ready,
        })
    }

    /// Clear everything except the configured gate line.
    pub fn reset(&mut self) {
        self.geometry = None;
        self.background.reset();
        self.trigger.reset();
        self.ring.clear();
        self.debug.clear();
        self.fps.reset();
        self.session_start_pts = 0.0;
        self.post_trigger_count = 0;
        self.post_trigger_total = 0;
        self.composite_slits.clear();
        self.composite = None;
        self.crossing = None;
        self.trigger_frame = None;
        self.trigger_debug_id = None;
        self.state = DetectorState::Idle;
    }

    /// Write the assembled composite strip as a PNG. Only available after a
    /// crossing's post-trigger window has completed.
    pub fn write_composite(&self) -> Result<PathBuf, RaceError> {
        let img = self
            .composite
            .as_ref()
            .ok_or_else(|| RaceError::wrong_state("write_composite", self.state))?;
        composite::write(img, &self.export_dir)
    }

    /// Dump the retained raw frames as indexed PNGs and return the manifest.
    pub fn export_debug_frames(&self) -> Result<DebugExport, RaceError> {
        if self.debug.is_empty() {
            return Err(RaceError::NoDebugFrames);
        }
        let geometry = self.geometry.ok_or(RaceError::NoDebugFrames)?;
        export::export_frames(
            &self.debug,
            self.trigger_debug_id,
            self.line_x,
            geometry.gate_pixel(self.line_x),
            &self.export_dir,
        )
    }
}

fn validate_dimensions(frame: &LumaFrame) -> Result<(), RaceError> {
    if frame.width < band::MIN_FRAME_DIM || frame.height < band::MIN_FRAME_DIM {
        return Err(RaceError::InvalidFrame(format!(
            "frame {}x{} below minimum {}",
            frame.width,
            frame.height,
            band::MIN_FRAME_DIM
        )));
    }
    if frame.data.len() < frame.width * frame.height {
        return Err(RaceError::InvalidFrame(format!(
            "buffer holds {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }
    Ok(())
}

fn dimension_error(frame: &LumaFrame, geometry: &BandGeometry) -> RaceError {
    warn!(
        "Frame {}x{} does not match session {}x{}",
        frame.width, frame.height, geometry.width, geometry.height
    );
    RaceError::InvalidFrame(format!(
        "dimensions changed: got {}x{}, session is {}x{}",
        frame.width, frame.height, geometry.width, geometry.height
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 200;
    const H: usize = 200;
    // band rows for H = 200: [60, 170), height 110

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            min_run_px: 5,
            reference_fps: 100.0,
            ..DetectorConfig::default()
        }
    }

    fn detector() -> GateDetector {
        GateDetector::new(test_config(), MonotonicClock::new())
    }

    fn empty_frame(pts: f64) -> LumaFrame {
        LumaFrame::uniform(W, H, 120, pts)
    }

    /// Frame with a dark stripe covering `rows` band rows at the gate.
    fn subject_frame(pts: f64, rows: usize) -> LumaFrame {
        let mut frame = LumaFrame::uniform(W, H, 120, pts);
        let geometry = BandGeometry::from_dimensions(W, H);
        let gate = geometry.gate_pixel(0.5);
        for row in geometry.band_top..(geometry.band_top + rows) {
            for x in gate.saturating_sub(1)..=(gate + 1) {
                frame.data[row * W + x] = 0;
            }
        }
        frame
    }

    fn calibrated_and_armed() -> GateDetector {
        let mut det = detector();
        det.start_calibration(&empty_frame(0.0)).unwrap();
        for i in 0..45 {
            let progress = det.calibrate(&empty_frame(i as f64 * 0.01)).unwrap();
            assert_eq!(progress.complete, i == 44);
        }
        assert_eq!(det.state(), DetectorState::Idle);
        det.arm(&empty_frame(0.5)).unwrap();
        det
    }

    #[test]
    fn test_calibration_transitions_to_idle_and_arms() {
        let det = calibrated_and_armed();
        assert_eq!(det.state(), DetectorState::Armed);
    }

    #[test]
    fn test_arm_without_calibration_fails() {
        let mut det = detector();
        let err = det.arm(&empty_frame(0.0)).unwrap_err();
        assert!(matches!(err, RaceError::NotCalibrated));
    }

    #[test]
    fn test_calibrate_outside_calibrating_fails() {
        let mut det = detector();
        let err = det.calibrate(&empty_frame(0.0)).unwrap_err();
        assert!(matches!(err, RaceError::WrongState { .. }));
    }

    #[test]
    fn test_process_while_idle_returns_inactive_report() {
        let mut det = detector();
        let report = det.process(&empty_frame(0.0)).unwrap();
        assert_eq!(report.r, 0.0);
        assert!(!report.crossed);
        assert_eq!(report.state_name, "IDLE");
    }

    #[test]
    fn test_two_frame_confirmation_with_interpolation() {
        let mut det = calibrated_and_armed();

        // empty gate, then a 44-row subject (r = 0.4 of the 110-row band)
        let report = det.process(&empty_frame(0.990)).unwrap();
        assert_eq!(report.r, 0.0);
        assert!(!report.crossed);

        let report = det.process(&subject_frame(1.000, 44)).unwrap();
        assert!(!report.crossed, "first above frame must not fire");

        let report = det.process(&subject_frame(1.010, 44)).unwrap();
        assert!(report.crossed);
        let crossing = report.crossing.unwrap();
        // alpha = (0.20 - 0) / (0.40 - 0) = 0.5 between pts 0.990 and 1.000
        assert!((crossing.trigger_pts - 0.995).abs() < 1e-6);
        assert!((crossing.pts_seconds - 1.010).abs() < 1e-9);
        assert!(crossing.uptime_nanos > 0);
        assert_eq!(report.state_name, "TRIGGERED");
        assert_eq!(det.last_crossing(), Some(crossing));

        // the confirming frame's pixels are retained
        let (pixels, pts) = det.trigger_frame().unwrap();
        assert_eq!(pixels.len(), W * H);
        assert!((pts - 1.010).abs() < 1e-9);
    }

    #[test]
    fn test_post_trigger_window_then_cooldown_hysteresis() {
        let mut det = calibrated_and_armed();

        // establish cadence so the fps estimate is meaningful
        let mut pts = 0.5;
        for _ in 0..10 {
            pts += 0.01;
            det.process(&empty_frame(pts)).unwrap();
        }
        pts += 0.01;
        det.process(&subject_frame(pts, 44)).unwrap();
        pts += 0.01;
        let report = det.process(&subject_frame(pts, 44)).unwrap();
        assert!(report.crossed);
        let total = report.post_trigger_total;
        assert!(total >= 1);

        // post-trigger frames are ingested without re-evaluating the trigger
        let mut composite_seen = false;
        for _ in 0..total {
            pts += 0.01;
            let r = det.process(&subject_frame(pts, 44)).unwrap();
            assert!(!r.crossed);
            composite_seen |= r.composite_ready;
        }
        assert!(composite_seen);
        assert_eq!(det.state(), DetectorState::Cooldown);

        // 4 clear + 1 occupied + 5 clear: only the unbroken streak re-arms
        for _ in 0..4 {
            pts += 0.01;
            det.process(&empty_frame(pts)).unwrap();
            assert_eq!(det.state(), DetectorState::Cooldown);
        }
        pts += 0.01;
        det.process(&subject_frame(pts, 44)).unwrap();
        assert_eq!(det.state(), DetectorState::Cooldown);
        for i in 0..5 {
            pts += 0.01;
            det.process(&empty_frame(pts)).unwrap();
            let expected = if i == 4 {
                DetectorState::Armed
            } else {
                DetectorState::Cooldown
            };
            assert_eq!(det.state(), expected);
        }
    }

    #[test]
    fn test_dimension_change_is_rejected() {
        let mut det = calibrated_and_armed();
        let wrong = LumaFrame::uniform(W + 8, H, 120, 1.0);
        let err = det.process(&wrong).unwrap_err();
        assert!(matches!(err, RaceError::InvalidFrame(_)));
    }

    #[test]
    fn test_undersized_frame_rejected_at_calibration() {
        let mut det = detector();
        let tiny = LumaFrame::uniform(32, 32, 120, 0.0);
        let err = det.start_calibration(&tiny).unwrap_err();
        assert!(matches!(err, RaceError::InvalidFrame(_)));
    }

    #[test]
    fn test_configure_clamps_and_survives_reset() {
        let mut det = detector();
        det.configure(0.95);
        assert_eq!(det.line_x(), 0.9);
        det.configure(0.9);
        assert_eq!(det.line_x(), 0.9);
        det.reset();
        assert_eq!(det.line_x(), 0.9);
        assert_eq!(det.state(), DetectorState::Idle);
    }

    #[test]
    fn test_reset_on_reset_is_noop() {
        let mut det = calibrated_and_armed();
        det.reset();
        let state = det.state();
        det.reset();
        assert_eq!(det.state(), state);
    }

    #[test]
    fn test_export_without_frames_fails() {
        let det = detector();
        let err = det.export_debug_frames().unwrap_err();
        assert!(matches!(err, RaceError::NoDebugFrames));
    }

    #[test]
    fn test_export_after_trigger_marks_frame() {
        let mut det = calibrated_and_armed();
        det.process(&empty_frame(0.990)).unwrap();
        det.process(&subject_frame(1.000, 44)).unwrap();
        det.process(&subject_frame(1.010, 44)).unwrap();

        let export = det.export_debug_frames().unwrap();
        assert_eq!(export.frame_width, W);
        let trigger_index = export.trigger_frame_index.unwrap();
        assert_eq!(export.frames[trigger_index].triggers_at, "TRIGGER");
    }

    #[test]
    fn test_write_composite_requires_completed_window() {
        let det = calibrated_and_armed();
        assert!(matches!(
            det.write_composite().unwrap_err(),
            RaceError::WrongState { .. }
        ));
    }

    #[test]
    fn test_elapsed_counts_from_arm() {
        let mut det = calibrated_and_armed(); // armed at pts 0.5
        let report = det.process(&empty_frame(2.5)).unwrap();
        assert!((report.elapsed_seconds - 2.0).abs() < 1e-9);
    }
}
