// src/error.rs

use thiserror::Error;

/// Error kinds surfaced by the timer core. Malformed frames and sync samples
/// are dropped locally; everything here is reported to the caller, never
/// panicked.
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("detector is not calibrated")]
    NotCalibrated,

    #[error("{op} is not valid in state {state}")]
    WrongState { op: &'static str, state: String },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("no debug frames have been captured")]
    NoDebugFrames,

    #[error("transport is not connected")]
    TransportUnavailable,

    #[error("no confirmed partner in the room")]
    PartnerMissing,

    #[error("clock sync is not ready")]
    SyncNotReady,

    #[error("implausible split: finish does not follow start")]
    ImplausibleSplit,

    #[error("session aborted mid-run")]
    Aborted,

    #[error("export i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

impl RaceError {
    pub fn wrong_state(op: &'static str, state: impl std::fmt::Display) -> Self {
        RaceError::WrongState {
            op,
            state: state.to_string(),
        }
    }
}
