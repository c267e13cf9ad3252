// SPDX-License-Identifier: GPL-3.0-only

//! Subject trajectory derivation
//!
//! - [`smoother`]: outlier rejection, gap interpolation and median filtering
//! - [`extractor`]: batch detection over a recorded file

pub mod extractor;
pub mod smoother;

pub use extractor::{ExtractorConfig, OfflineTrajectoryExtractor, Trajectory};
pub use smoother::{EdgeFill, SmootherParams, TrajectorySmoother};

use crate::frame_processor::types::Point;
use crate::storage::StoredDetectionLog;

/// Smooth normalized centers in the pixel space of a `width` x `height` frame
///
/// Deviation thresholds are expressed in pixels, so centers are scaled up
/// before smoothing and normalized again afterwards.
pub fn smooth_normalized(
    smoother: &TrajectorySmoother,
    centers: &[Option<Point>],
    width: u32,
    height: u32,
) -> Vec<Point> {
    let (w, h) = (width.max(1) as f64, height.max(1) as f64);
    let pixels: Vec<Option<Point>> = centers.iter().map(|c| c.map(|p| p.scaled(w, h))).collect();
    smoother
        .smooth(&pixels)
        .into_iter()
        .map(|p| p.scaled(1.0 / w, 1.0 / h))
        .collect()
}

/// Re-smooth the primary subject of a stored detection log
pub fn smooth_detection_log(smoother: &TrajectorySmoother, log: &StoredDetectionLog) -> Trajectory {
    let centers: Vec<Option<Point>> = log.entries.iter().map(|e| e.primary_center()).collect();
    Trajectory {
        frame_width: log.width,
        frame_height: log.height,
        timestamps: log.entries.iter().map(|e| e.timestamp).collect(),
        centers: smooth_normalized(smoother, &centers, log.width, log.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::MediaTime;
    use crate::frame_processor::DetectionResult;

    #[test]
    fn test_deviation_measured_in_pixels() {
        // 0.05 of a 1920 wide frame is 96 px, well beyond the 40 px limit
        let centers = [
            Some(Point::new(0.5, 0.5)),
            Some(Point::new(0.5, 0.5)),
            Some(Point::new(0.55, 0.5)),
        ];
        let smoother = TrajectorySmoother::new(SmootherParams {
            kernel_size: 1,
            edge_fill: EdgeFill::Nearest,
            ..SmootherParams::default()
        });

        let wide = smooth_normalized(&smoother, &centers, 1920, 1080);
        assert!((wide[2].x - 0.5).abs() < 1e-9);

        // On a 320 px frame the same move is 16 px and survives
        let narrow = smooth_normalized(&smoother, &centers, 320, 240);
        assert!((narrow[2].x - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_stored_log_glitch_is_removed() {
        let entries = [0.5, 0.5, 0.5, 0.9, 0.5]
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                DetectionResult::new(MediaTime::new(i as i64, 30), vec![Point::new(x, 0.5)])
            })
            .collect();
        let log = StoredDetectionLog::new(640, 480, entries);

        let trajectory = smooth_detection_log(&TrajectorySmoother::default(), &log);
        assert_eq!(trajectory.centers.len(), 5);
        assert_eq!(trajectory.timestamps[4], MediaTime::new(4, 30));
        for center in &trajectory.centers {
            assert!((center.x - 0.5).abs() < 1e-9);
            assert!((center.y - 0.5).abs() < 1e-9);
        }
    }
}
