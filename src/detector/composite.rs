// src/detector/composite.rs
//
// Slit composite: the retained gate slits laid out as image columns, oldest
// on the left, one band row per image row. The result is the classic
// photo-finish strip with time on the horizontal axis.

use crate::detector::ring::SlitSample;
use crate::error::RaceError;
use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::info;

/// Build the composite image from oldest-first slit columns.
/// Returns None when there are no slits to lay out.
pub fn assemble(slits: &[SlitSample], band_height: usize) -> Option<GrayImage> {
    if slits.is_empty() || band_height == 0 {
        return None;
    }

    let width = slits.len();
    let mut img = GrayImage::new(width as u32, band_height as u32);
    for (col, sample) in slits.iter().enumerate() {
        for row in 0..band_height.min(sample.luma.len()) {
            img.put_pixel(col as u32, row as u32, image::Luma([sample.luma[row]]));
        }
    }
    Some(img)
}

/// Write a composite as `composite_<unix_ms>.png` under `dir`.
pub fn write(img: &GrayImage, dir: &Path) -> Result<PathBuf, RaceError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "composite_{}.png",
        chrono::Utc::now().timestamp_millis()
    ));
    img.save(&path)?;
    info!(
        "📸 Composite written: {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(path)
}
