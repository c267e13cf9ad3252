// SPDX-License-Identifier: GPL-3.0-only

//! QR marker detector
//!
//! A lightweight [`ObjectDetector`] that treats every QR code in view as the
//! tracked subject, so a printed marker worn by the subject stands in for a
//! full object detection model.

use crate::errors::DetectionError;
use crate::frame_processor::tasks::subject_detector::ObjectDetector;
use crate::frame_processor::types::{Detection, FrameRegion};
use image::RgbaImage;
use tracing::{debug, trace};

/// Confidence reported for markers whose payload decoded
const DECODED_CONFIDENCE: f32 = 1.0;

/// Confidence reported for a grid that was located but failed to decode
const UNDECODED_CONFIDENCE: f32 = 0.5;

pub struct QrMarkerDetector {
    label: String,
}

impl QrMarkerDetector {
    /// Detector reporting every marker under `label`
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ObjectDetector for QrMarkerDetector {
    fn infer(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InferenceFailed("empty image".into()));
        }

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                luma(image.get_pixel(x as u32, y as u32).0)
            });
        let grids = prepared.detect_grids();
        trace!(count = grids.len(), "QR grids located");

        let detections = grids
            .iter()
            .map(|grid| {
                let xs = grid.bounds.iter().map(|p| p.x.clamp(0, width as i32) as u32);
                let ys = grid.bounds.iter().map(|p| p.y.clamp(0, height as i32) as u32);
                let (min_x, max_x) = min_max(xs);
                let (min_y, max_y) = min_max(ys);
                let region = FrameRegion::from_pixels(
                    min_x,
                    min_y,
                    max_x - min_x,
                    max_y - min_y,
                    width,
                    height,
                );

                let confidence = match grid.decode() {
                    Ok((_, content)) => {
                        debug!(content = %content, x = region.x, y = region.y, "QR marker decoded");
                        DECODED_CONFIDENCE
                    }
                    Err(e) => {
                        debug!(error = %e, "QR marker located but not decodable");
                        UNDECODED_CONFIDENCE
                    }
                };
                Detection::new(self.label.clone(), confidence, region)
            })
            .collect();

        Ok(detections)
    }

    fn name(&self) -> &str {
        "qr-marker"
    }
}

/// BT.601 luma
fn luma([r, g, b, _]: [u8; 4]) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

fn min_max(values: impl Iterator<Item = u32>) -> (u32, u32) {
    values.fold((u32::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_image_has_no_markers() {
        let mut detector = QrMarkerDetector::with_label("person");
        let image = RgbaImage::from_pixel(64, 64, image::Rgba([255, 255, 255, 255]));
        assert!(detector.infer(&image).unwrap().is_empty());
    }

    #[test]
    fn test_empty_image_is_an_error() {
        let mut detector = QrMarkerDetector::with_label("person");
        assert!(detector.infer(&RgbaImage::new(0, 0)).is_err());
    }

    #[test]
    fn test_luma() {
        assert_eq!(luma([255, 255, 255, 255]), 255);
        assert_eq!(luma([0, 0, 0, 255]), 0);
    }
}
