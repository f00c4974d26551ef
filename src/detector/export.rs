// src/detector/export.rs
//
// Debug frame export: dumps the retained raw frames as indexed grayscale
// PNGs plus a JSON manifest describing each one. Used to tune the gate
// placement and thresholds in the field.

use crate::detector::ring::DebugFrameBuffer;
use crate::error::RaceError;
use image::GrayImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Literal written into `triggers_at` for the trigger frame.
const TRIGGER_MARK: &str = "TRIGGER";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFrameInfo {
    pub index: usize,
    pub path: String,
    pub pts: f64,
    pub r: f32,
    /// "TRIGGER" for the trigger frame, empty otherwise
    pub triggers_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugExport {
    pub frames: Vec<DebugFrameInfo>,
    pub frame_width: usize,
    pub frame_height: usize,
    pub gate_line_x: f64,
    pub gate_pixel_x: usize,
    pub trigger_frame_index: Option<usize>,
}

/// Write every retained frame as `debug_frames_<unix_ms>/frame_NNNN.png`
/// and return the manifest. `trigger_id` is the debug-buffer id of the
/// trigger frame, if one fired and is still retained.
pub fn export_frames(
    buffer: &DebugFrameBuffer,
    trigger_id: Option<u64>,
    gate_line_x: f64,
    gate_pixel_x: usize,
    base_dir: &Path,
) -> Result<DebugExport, RaceError> {
    if buffer.is_empty() {
        return Err(RaceError::NoDebugFrames);
    }

    let dir = base_dir.join(format!(
        "debug_frames_{}",
        chrono::Utc::now().timestamp_millis()
    ));
    std::fs::create_dir_all(&dir)?;

    let trigger_index = trigger_id.and_then(|id| buffer.position_of(id));

    let mut frames = Vec::with_capacity(buffer.len());
    let mut frame_width = 0;
    let mut frame_height = 0;

    for (index, frame) in buffer.iter().enumerate() {
        frame_width = frame.width;
        frame_height = frame.height;

        let path = dir.join(format!("frame_{:04}.png", index));
        let img = GrayImage::from_raw(frame.width as u32, frame.height as u32, frame.luma.clone())
            .ok_or_else(|| {
                RaceError::InvalidFrame(format!(
                    "debug frame {} does not match {}x{}",
                    index, frame.width, frame.height
                ))
            })?;
        img.save(&path)?;

        frames.push(DebugFrameInfo {
            index,
            path: path.display().to_string(),
            pts: frame.pts,
            r: frame.r,
            triggers_at: if trigger_index == Some(index) {
                TRIGGER_MARK.to_string()
            } else {
                String::new()
            },
        });
    }

    info!(
        "💾 Exported {} debug frames to {}",
        frames.len(),
        dir.display()
    );

    Ok(DebugExport {
        frames,
        frame_width,
        frame_height,
        gate_line_x,
        gate_pixel_x,
        trigger_frame_index: trigger_index,
    })
}

/// Write the manifest next to the exported frames.
pub fn write_manifest(export: &DebugExport, dir: &Path) -> Result<PathBuf, RaceError> {
    let path = dir.join("manifest.json");
    let json = serde_json::to_string_pretty(export)
        .map_err(|e| RaceError::InvalidFrame(format!("manifest serialization: {}", e)))?;
    std::fs::write(&path, json)?;
    Ok(path)
}
