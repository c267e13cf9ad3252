// SPDX-License-Identifier: GPL-3.0-only

//! Subject detection task
//!
//! Wraps an opaque [`ObjectDetector`] with frame-to-image conversion and the
//! label/confidence filtering that turns raw boxes into subject centers.

use crate::backends::camera::types::{PixelFormat, VideoFrame};
use crate::constants::detection;
use crate::errors::DetectionError;
use crate::frame_processor::types::{Detection, Point};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use tracing::{debug, trace, warn};

/// Opaque object detection capability
///
/// Boxes are reported in normalized coordinates relative to the image passed
/// in. Implementations run on the detection worker thread.
pub trait ObjectDetector: Send {
    fn infer(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, DetectionError>;

    /// Short name for logs
    fn name(&self) -> &str {
        "detector"
    }
}

/// Detector plus the policy applied to its output
pub struct DetectionAdapter {
    detector: Box<dyn ObjectDetector>,
    subject_label: String,
    confidence_threshold: f32,
    /// Frames larger than this are downscaled before inference
    max_dimension: Option<u32>,
}

impl DetectionAdapter {
    pub fn new(detector: Box<dyn ObjectDetector>) -> Self {
        Self {
            detector,
            subject_label: detection::SUBJECT_LABEL.to_string(),
            confidence_threshold: detection::CONFIDENCE_THRESHOLD,
            max_dimension: Some(detection::MAX_DIMENSION),
        }
    }

    pub fn with_subject_label(mut self, label: impl Into<String>) -> Self {
        self.subject_label = label.into();
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn subject_label(&self) -> &str {
        &self.subject_label
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Boxes matching the subject label at or above the threshold, in
    /// detector order
    pub fn detect_boxes(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectionError> {
        let start = std::time::Instant::now();
        let image = frame_to_rgba_image(frame, self.max_dimension)?;
        let conversion_time = start.elapsed();

        let raw = self.detector.infer(&image)?;
        trace!(
            detector = self.detector.name(),
            raw = raw.len(),
            conversion_ms = conversion_time.as_millis(),
            inference_ms = (start.elapsed() - conversion_time).as_millis(),
            "Inference complete"
        );

        Ok(raw
            .into_iter()
            .filter(|d| d.label == self.subject_label && d.confidence >= self.confidence_threshold)
            .collect())
    }

    /// Midpoints of every matching box, in detector order
    ///
    /// An empty list means nothing matched; substituting last-known centers is
    /// the caller's job.
    pub fn try_detect(&mut self, frame: &VideoFrame) -> Result<Vec<Point>, DetectionError> {
        let boxes = self.detect_boxes(frame)?;
        if !boxes.is_empty() {
            debug!(count = boxes.len(), pts = %frame.pts, "Subject detected");
        }
        Ok(boxes.iter().map(|d| d.region.center()).collect())
    }

    /// Like [`try_detect`](Self::try_detect) but failures count as "no detection"
    pub fn detect(&mut self, frame: &VideoFrame) -> Vec<Point> {
        self.try_detect(frame).unwrap_or_else(|e| {
            warn!(error = %e, pts = %frame.pts, "Detection failed");
            Vec::new()
        })
    }
}

/// Convert a captured frame to a tightly packed RGBA image
///
/// Honors row stride and BGRA ordering, and downscales so neither side exceeds
/// `max_dimension`.
pub fn frame_to_rgba_image(
    frame: &VideoFrame,
    max_dimension: Option<u32>,
) -> Result<RgbaImage, DetectionError> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let row_bytes = width * frame.format.bytes_per_pixel() as usize;

    if width == 0 || height == 0 {
        return Err(DetectionError::ConversionFailed("empty frame".into()));
    }
    if stride < row_bytes {
        return Err(DetectionError::ConversionFailed(format!(
            "stride {} shorter than row ({} bytes)",
            stride, row_bytes
        )));
    }
    let required = stride * (height - 1) + row_bytes;
    if frame.data.len() < required {
        return Err(DetectionError::ConversionFailed(format!(
            "buffer holds {} bytes, {} required",
            frame.data.len(),
            required
        )));
    }

    let mut rgba = Vec::with_capacity(row_bytes * height);
    for row in frame.data.chunks(stride).take(height) {
        rgba.extend_from_slice(&row[..row_bytes]);
    }
    if frame.format == PixelFormat::BGRA {
        for pixel in rgba.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }

    let image = RgbaImage::from_raw(frame.width, frame.height, rgba)
        .ok_or_else(|| DetectionError::ConversionFailed("dimension mismatch".into()))?;

    match max_dimension {
        Some(max) if max > 0 && (frame.width > max || frame.height > max) => {
            let scale = (frame.width as f32 / max as f32).max(frame.height as f32 / max as f32);
            let new_width = ((frame.width as f32 / scale) as u32).max(1);
            let new_height = ((frame.height as f32 / scale) as u32).max(1);
            Ok(imageops::resize(
                &image,
                new_width,
                new_height,
                FilterType::Triangle,
            ))
        }
        _ => Ok(image),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::MediaTime;
    use crate::frame_processor::types::FrameRegion;
    use std::sync::{Arc, Mutex};

    struct ScriptedDetector {
        detections: Vec<Detection>,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl ObjectDetector for ScriptedDetector {
        fn infer(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
            self.seen.lock().unwrap().push(image.dimensions());
            Ok(self.detections.clone())
        }
    }

    fn frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame::from_bytes(
            width,
            height,
            PixelFormat::RGBA,
            vec![0; (width * height * 4) as usize],
            MediaTime::ZERO,
        )
    }

    fn adapter(detections: Vec<Detection>) -> (DetectionAdapter, Arc<Mutex<Vec<(u32, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = ScriptedDetector {
            detections,
            seen: Arc::clone(&seen),
        };
        (DetectionAdapter::new(Box::new(detector)), seen)
    }

    #[test]
    fn test_filters_label_and_confidence_keeping_order() {
        let (mut adapter, _) = adapter(vec![
            Detection::new("person", 0.9, FrameRegion::new(0.6, 0.6, 0.2, 0.2)),
            Detection::new("dog", 0.99, FrameRegion::new(0.0, 0.0, 0.2, 0.2)),
            Detection::new("person", 0.5, FrameRegion::new(0.0, 0.0, 0.2, 0.2)),
            Detection::new("person", 0.70, FrameRegion::new(0.0, 0.0, 0.2, 0.4)),
        ]);

        let centers = adapter.detect(&frame(8, 8));
        assert_eq!(centers.len(), 2);
        assert!((centers[0].x - 0.7).abs() < 1e-6);
        assert!((centers[1].x - 0.1).abs() < 1e-6);
        assert!((centers[1].y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_conversion_failure_is_no_detection() {
        let (mut adapter, seen) = adapter(vec![Detection::new(
            "person",
            1.0,
            FrameRegion::new(0.0, 0.0, 1.0, 1.0),
        )]);
        let mut bad = frame(8, 8);
        bad.data = vec![0u8; 10].into();

        assert!(adapter.try_detect(&bad).is_err());
        assert!(adapter.detect(&bad).is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_large_frames_are_downscaled() {
        let (adapter, seen) = adapter(Vec::new());
        let mut adapter = adapter.with_max_dimension(Some(64));
        adapter.detect(&frame(256, 128));
        assert_eq!(seen.lock().unwrap().as_slice(), &[(64, 32)]);

        let mut adapter = adapter.with_max_dimension(None);
        adapter.detect(&frame(256, 128));
        assert_eq!(seen.lock().unwrap()[1], (256, 128));
    }

    #[test]
    fn test_stride_and_bgra_conversion() {
        // 2x2 BGRA frame with 4 bytes of row padding
        let data = vec![
            1, 2, 3, 255, 4, 5, 6, 255, 0, 0, 0, 0, //
            7, 8, 9, 255, 10, 11, 12, 255, 0, 0, 0, 0,
        ];
        let frame = VideoFrame {
            width: 2,
            height: 2,
            stride: 12,
            format: PixelFormat::BGRA,
            data: data.into(),
            pts: MediaTime::ZERO,
        };

        let image = frame_to_rgba_image(&frame, None).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [12, 11, 10, 255]);
    }
}
