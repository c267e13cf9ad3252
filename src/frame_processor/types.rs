// SPDX-License-Identifier: MPL-2.0

//! Core types for detection results
//!
//! Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions,
//! so results stay valid whatever resolution the detector actually ran at.

use crate::backends::camera::types::MediaTime;
use serde::{Deserialize, Serialize};

/// A 2-D point in normalized frame space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Scale both axes (normalized to pixel space and back)
    pub fn scaled(&self, sx: f64, sy: f64) -> Point {
        Point::new(self.x * sx, self.y * sy)
    }
}

/// A rectangular region within a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        Self {
            x: x as f32 / fw,
            y: y as f32 / fh,
            width: width as f32 / fw,
            height: height as f32 / fh,
        }
    }

    /// Midpoint of the region
    pub fn center(&self) -> Point {
        Point::new(
            (self.x + self.width / 2.0) as f64,
            (self.y + self.height / 2.0) as f64,
        )
    }
}

/// A labeled box reported by an object detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub region: FrameRegion,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, region: FrameRegion) -> Self {
        Self {
            label: label.into(),
            confidence,
            region,
        }
    }
}

/// Subject centers observed at one frame timestamp
///
/// `timestamp` is the original capture time of the frame, never the
/// slow-motion remapped one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub timestamp: MediaTime,
    pub centers: Vec<Point>,
}

impl DetectionResult {
    pub fn new(timestamp: MediaTime, centers: Vec<Point>) -> Self {
        Self { timestamp, centers }
    }

    /// First center, used when a single trajectory is derived from the log
    pub fn primary_center(&self) -> Option<Point> {
        self.centers.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_center() {
        let region = FrameRegion::new(0.2, 0.4, 0.2, 0.2);
        let center = region.center();
        assert!((center.x - 0.3).abs() < 1e-6);
        assert!((center.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_region_from_pixels() {
        let region = FrameRegion::from_pixels(160, 120, 320, 240, 640, 480);
        assert_eq!(region, FrameRegion::new(0.25, 0.25, 0.5, 0.5));
    }

    #[test]
    fn test_detection_result_json() {
        let result = DetectionResult::new(MediaTime::new(1, 30), vec![Point::new(0.5, 0.25)]);
        let json = serde_json::to_string(&result).unwrap();
        let back: DetectionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.primary_center(), Some(Point::new(0.5, 0.25)));
    }
}
