// src/config.rs

use crate::types::Config;
use anyhow::Result;
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuning_constants() {
        let config = Config::default();
        assert_eq!(config.detector.calibration_frames, 45);
        assert_eq!(config.detector.diff_threshold, 30);
        assert_eq!(config.detector.trigger_on, 0.20);
        assert_eq!(config.detector.trigger_off, 0.10);
        assert_eq!(config.sync.sample_window, 100);
        assert_eq!(config.sync.min_samples, 10);
        assert_eq!(config.sync.ping_interval_ms, 30);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "detector:\n  line_x: 0.4\n  calibration_frames: 45\n  diff_threshold: 30\n  trigger_on: 0.20\n  trigger_off: 0.10\n  rearm_frames: 5\n  min_run_px: 60\n  reference_fps: 120.0\n  debug_buffer_frames: 360\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.detector.line_x, 0.4);
        assert_eq!(config.detector.reference_fps, 120.0);
        // untouched sections come from Default
        assert_eq!(config.sync.sample_window, 100);
        assert_eq!(config.session.heartbeat_interval_ms, 1000);
    }
}
