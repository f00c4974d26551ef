// src/detector/occupancy.rs
//
// Per-frame foreground occupancy at the gate. A band row is foreground when
// its slit luma differs from the frozen background by at least the diff
// threshold; the occupancy ratio is the longest contiguous foreground run
// over the band height, zeroed when the run is too short to be a subject.

/// Occupancy measurement for one frame.
#[derive(Debug, Clone)]
pub struct Occupancy {
    /// Longest contiguous foreground run over the band height; 0 when the
    /// run fails the minimum-run filter
    pub r: f32,
    /// Length of the longest run in rows (pre-filter)
    pub longest_run: usize,
    /// Normalized y positions of all foreground rows, for visualization
    pub detection_points: Vec<f32>,
}

/// Minimum run length for a given band height: the configured pixel floor or
/// 15% of the band, whichever is larger.
pub fn min_run_rows(band_height: usize, min_run_px: usize) -> usize {
    min_run_px.max((0.15 * band_height as f32).floor() as usize)
}

pub fn measure(
    slit: &[u8],
    background: &[u8],
    diff_threshold: u8,
    min_run_px: usize,
    band_top: usize,
    frame_height: usize,
) -> Occupancy {
    debug_assert_eq!(slit.len(), background.len());
    let band_height = slit.len();

    let mut longest_run = 0usize;
    let mut current_run = 0usize;
    let mut detection_points = Vec::new();

    for (i, (&s, &bg)) in slit.iter().zip(background).enumerate() {
        let diff = (s as i16 - bg as i16).unsigned_abs() as u8;
        if diff >= diff_threshold {
            current_run += 1;
            longest_run = longest_run.max(current_run);
            detection_points.push((i + band_top) as f32 / frame_height as f32);
        } else {
            current_run = 0;
        }
    }

    let r = if longest_run < min_run_rows(band_height, min_run_px) {
        0.0
    } else {
        longest_run as f32 / band_height as f32
    };

    Occupancy {
        r,
        longest_run,
        detection_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: usize = 720;
    const TOP: usize = 216;

    #[test]
    fn test_empty_gate_reports_zero() {
        let slit = vec![120u8; 400];
        let bg = vec![120u8; 400];
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert_eq!(occ.r, 0.0);
        assert_eq!(occ.longest_run, 0);
        assert!(occ.detection_points.is_empty());
    }

    #[test]
    fn test_long_run_reports_ratio() {
        let bg = vec![120u8; 400];
        let mut slit = bg.clone();
        for row in 100..300 {
            slit[row] = 20; // |20 - 120| = 100 >= 30
        }
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert_eq!(occ.longest_run, 200);
        assert!((occ.r - 0.5).abs() < 1e-6);
        assert_eq!(occ.detection_points.len(), 200);
    }

    #[test]
    fn test_short_run_is_filtered_to_zero() {
        // min run for a 400-row band is max(60, 60) = 60
        let bg = vec![120u8; 400];
        let mut slit = bg.clone();
        for row in 0..59 {
            slit[row] = 0;
        }
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert_eq!(occ.longest_run, 59);
        assert_eq!(occ.r, 0.0);
        // rows are still reported as detection points
        assert_eq!(occ.detection_points.len(), 59);
    }

    #[test]
    fn test_gap_splits_the_run() {
        let bg = vec![120u8; 400];
        let mut slit = bg.clone();
        for row in 0..50 {
            slit[row] = 0;
        }
        for row in 51..101 {
            slit[row] = 0;
        }
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert_eq!(occ.longest_run, 50);
        assert_eq!(occ.r, 0.0);
    }

    #[test]
    fn test_proportional_floor_beats_pixel_floor_on_tall_bands() {
        // band of 800 rows: max(60, floor(0.15 * 800)) = 120
        assert_eq!(min_run_rows(800, 60), 120);
        assert_eq!(min_run_rows(400, 60), 60);
        assert_eq!(min_run_rows(100, 60), 60);
    }

    #[test]
    fn test_detection_points_are_normalized_to_frame() {
        let bg = vec![120u8; 400];
        let mut slit = bg.clone();
        slit[0] = 0;
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert!((occ.detection_points[0] - TOP as f32 / H as f32).abs() < 1e-6);
    }

    #[test]
    fn test_r_stays_in_unit_interval() {
        let bg = vec![120u8; 400];
        let slit = vec![0u8; 400]; // full-band foreground
        let occ = measure(&slit, &bg, 30, 60, TOP, H);
        assert!((occ.r - 1.0).abs() < 1e-6);
    }
}
