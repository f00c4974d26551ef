// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// Detector State Machine States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorState {
    /// Detector constructed or reset, no background model yet
    Idle,
    /// Accumulating background samples at the gate column
    Calibrating,
    /// Background frozen, watching for a crossing
    Armed,
    /// Crossing confirmed, collecting post-trigger slits
    Triggered,
    /// Waiting for the gate to clear before re-arming
    Cooldown,
}

impl DetectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorState::Idle => "IDLE",
            DetectorState::Calibrating => "CALIBRATING",
            DetectorState::Armed => "ARMED",
            DetectorState::Triggered => "TRIGGERED",
            DetectorState::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session State Machine States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No room joined
    Idle,
    /// Room joined, waiting for the peer's role confirmation
    Pairing,
    /// Exchanging sync pings with the peer
    Syncing,
    /// Clocks synchronized, waiting for arm
    Ready,
    /// Armed, waiting for the start crossing
    Armed,
    /// Start crossing recorded, waiting for the finish crossing
    Running,
    /// Split computed (or race aborted); ignores crossings until reset
    Finished,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Pairing => "PAIRING",
            SessionState::Syncing => "SYNCING",
            SessionState::Ready => "READY",
            SessionState::Armed => "ARMED",
            SessionState::Running => "RUNNING",
            SessionState::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Device Role
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Start,
    Finish,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Start => "start",
            Role::Finish => "finish",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Role::Start => Role::Finish,
            Role::Finish => Role::Start,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync Quality Grading
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncQuality {
    Excellent,
    Good,
    Ok,
    Poor,
}

impl SyncQuality {
    /// Grade an uncertainty in milliseconds
    pub fn from_uncertainty_ms(ms: f64) -> Self {
        if ms <= 3.0 {
            SyncQuality::Excellent
        } else if ms <= 5.0 {
            SyncQuality::Good
        } else if ms <= 10.0 {
            SyncQuality::Ok
        } else {
            SyncQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncQuality::Excellent => "excellent",
            SyncQuality::Good => "good",
            SyncQuality::Ok => "ok",
            SyncQuality::Poor => "poor",
        }
    }
}

impl std::fmt::Display for SyncQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Frame type
// ============================================================================

/// Single-plane luma frame as delivered by the camera pipeline.
/// `data` holds `width * height` bytes, row-major.
#[derive(Debug, Clone)]
pub struct LumaFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Presentation timestamp in seconds on a session-relative clock
    pub pts: f64,
}

impl LumaFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, pts: f64) -> Self {
        Self {
            data,
            width,
            height,
            pts,
        }
    }

    /// Uniform-luma frame, handy for calibration and tests
    pub fn uniform(width: usize, height: usize, luma: u8, pts: f64) -> Self {
        Self {
            data: vec![luma; width * height],
            width,
            height,
            pts,
        }
    }
}

// ============================================================================
// Crossing record (DET -> SESS boundary)
// ============================================================================

/// One confirmed gate crossing. The three timestamps together let the
/// session reconstruct the crossing in the peer's clock domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Interpolated crossing PTS in seconds (may lie slightly before `pts_seconds`)
    pub trigger_pts: f64,
    /// PTS of the frame on which the trigger was confirmed
    pub pts_seconds: f64,
    /// Monotonic nanos captured when the trigger was confirmed
    pub uptime_nanos: i64,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Gate line as a fraction of frame width, clamped to [0.1, 0.9] (default: 0.5)
    pub line_x: f64,
    /// Background samples accumulated before the model freezes (default: 45)
    pub calibration_frames: u32,
    /// |slit - bg| at or above this marks a foreground row (default: 30)
    pub diff_threshold: u8,
    /// Occupancy at or above this counts toward the trigger (default: 0.20)
    pub trigger_on: f32,
    /// Occupancy below this counts toward re-arming (default: 0.10)
    pub trigger_off: f32,
    /// Consecutive low-occupancy frames required to leave cooldown (default: 5)
    pub rearm_frames: u32,
    /// Pixel floor of the minimum-run noise filter (default: 60)
    pub min_run_px: usize,
    /// Expected camera frame rate; sizes the pre-trigger ring and the
    /// drop-detection interval (default: 240)
    pub reference_fps: f64,
    /// Raw frames retained for debug export, FIFO evicted (default: 360)
    pub debug_buffer_frames: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            line_x: 0.5,
            calibration_frames: 45,
            diff_threshold: 30,
            trigger_on: 0.20,
            trigger_off: 0.10,
            rearm_frames: 5,
            min_run_px: 60,
            reference_fps: 240.0,
            debug_buffer_frames: 360,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Sample window size, oldest evicted (default: 100)
    pub sample_window: usize,
    /// Samples required before the offset is trusted (default: 10)
    pub min_samples: usize,
    /// Fraction of lowest-RTT samples used for the estimate (default: 0.30)
    pub best_fraction: f64,
    /// Pings sent per sync burst (default: 100)
    pub ping_count: u32,
    /// Interval between burst pings in milliseconds (default: 30)
    pub ping_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sample_window: 100,
            min_samples: 10,
            best_fraction: 0.30,
            ping_count: 100,
            ping_interval_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Heartbeat cadence while paired, milliseconds (default: 1000)
    pub heartbeat_interval_ms: u64,
    /// Peer silence beyond this means the partner is gone (default: 5000)
    pub partner_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            partner_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory for composites and debug frame dumps.
    /// Empty means the process temp directory.
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
