// SPDX-License-Identifier: GPL-3.0-only

//! Offline trajectory extraction
//!
//! Decodes a recorded file sequentially, detects the subject on every
//! `(frame_skip + 1)`-th frame and smooths the resulting center sequence.
//! Runs synchronously on the calling thread.

use super::smoother::{SmootherParams, TrajectorySmoother};
use super::smooth_normalized;
use crate::backends::camera::types::MediaTime;
use crate::constants::trajectory;
use crate::errors::ExtractionError;
use crate::frame_processor::DetectionAdapter;
use crate::frame_processor::types::Point;
use crate::media::decoders::{FrameSource, GstFileFrameSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Frames skipped between detections
    pub frame_skip: usize,
    pub smoother: SmootherParams,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            frame_skip: trajectory::FRAME_SKIP,
            smoother: SmootherParams::default(),
        }
    }
}

/// Smoothed subject path, one normalized center per decoded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub frame_width: u32,
    pub frame_height: u32,
    pub timestamps: Vec<MediaTime>,
    pub centers: Vec<Point>,
}

/// Per-frame centers before smoothing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTrajectory {
    pub frame_width: u32,
    pub frame_height: u32,
    pub timestamps: Vec<MediaTime>,
    /// `None` for skipped frames and frames that could not be analyzed
    pub centers: Vec<Option<Point>>,
}

pub struct OfflineTrajectoryExtractor {
    adapter: DetectionAdapter,
    config: ExtractorConfig,
}

impl OfflineTrajectoryExtractor {
    pub fn new(adapter: DetectionAdapter, config: ExtractorConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Decode and smooth the recording at `path`
    pub fn extract_file(&mut self, path: &Path) -> Result<Trajectory, ExtractionError> {
        let mut source = GstFileFrameSource::open(path)?;
        self.extract(&mut source)
    }

    pub fn extract(&mut self, source: impl FrameSource) -> Result<Trajectory, ExtractionError> {
        let raw = self.extract_raw(source)?;
        let smoother = TrajectorySmoother::new(self.config.smoother);
        let centers = smooth_normalized(&smoother, &raw.centers, raw.frame_width, raw.frame_height);

        info!(
            frames = centers.len(),
            width = raw.frame_width,
            height = raw.frame_height,
            "Trajectory extracted"
        );

        Ok(Trajectory {
            frame_width: raw.frame_width,
            frame_height: raw.frame_height,
            timestamps: raw.timestamps,
            centers,
        })
    }

    /// Collect one optional center per decoded frame
    ///
    /// The last detected center is carried forward (starting at the origin)
    /// when a sampled frame shows no subject. Any decode error aborts the
    /// whole extraction.
    pub fn extract_raw(
        &mut self,
        mut source: impl FrameSource,
    ) -> Result<RawTrajectory, ExtractionError> {
        let stride = self.config.frame_skip + 1;
        let mut raw = RawTrajectory::default();
        let mut center = Point::ORIGIN;
        let mut detected = 0usize;

        let mut index = 0usize;
        while let Some(frame) = source.next_frame()? {
            if raw.timestamps.is_empty() {
                raw.frame_width = frame.width;
                raw.frame_height = frame.height;
            }
            raw.timestamps.push(frame.pts);

            if index % stride == 0 {
                match self.adapter.try_detect(&frame) {
                    Ok(centers) => {
                        if let Some(first) = centers.first() {
                            center = *first;
                            detected += 1;
                        }
                        raw.centers.push(Some(center));
                    }
                    Err(e) => {
                        warn!(error = %e, index, "Frame could not be analyzed");
                        raw.centers.push(None);
                    }
                }
            } else {
                raw.centers.push(None);
            }

            index += 1;
        }

        debug!(frames = index, detected, stride, "Decoding finished");
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{PixelFormat, VideoFrame};
    use crate::errors::DetectionError;
    use crate::frame_processor::ObjectDetector;
    use crate::frame_processor::types::{Detection, FrameRegion};
    use image::RgbaImage;
    use std::collections::VecDeque;

    struct ScriptedSource {
        frames: VecDeque<Result<VideoFrame, ExtractionError>>,
    }

    impl ScriptedSource {
        fn new(count: usize) -> Self {
            Self {
                frames: (0..count)
                    .map(|i| {
                        Ok(VideoFrame::from_bytes(
                            100,
                            100,
                            PixelFormat::BGRA,
                            vec![0; 100 * 100 * 4],
                            MediaTime::new(i as i64, 30),
                        ))
                    })
                    .collect(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<VideoFrame>, ExtractionError> {
            self.frames.pop_front().transpose()
        }
    }

    /// Reports one subject per call, walking right by 0.1 each time
    struct Walker {
        calls: usize,
    }

    impl ObjectDetector for Walker {
        fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
            let x = 0.1 * self.calls as f32;
            self.calls += 1;
            Ok(vec![Detection::new(
                "person",
                0.9,
                FrameRegion::new(x, 0.4, 0.0, 0.2),
            )])
        }
    }

    struct Nothing;

    impl ObjectDetector for Nothing {
        fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
            Ok(Vec::new())
        }
    }

    fn extractor(detector: Box<dyn ObjectDetector>, frame_skip: usize) -> OfflineTrajectoryExtractor {
        OfflineTrajectoryExtractor::new(
            DetectionAdapter::new(detector),
            ExtractorConfig {
                frame_skip,
                ..ExtractorConfig::default()
            },
        )
    }

    #[test]
    fn test_stride_sampling() {
        let mut extractor = extractor(Box::new(Walker { calls: 0 }), 2);
        let raw = extractor.extract_raw(ScriptedSource::new(7)).unwrap();

        assert_eq!(raw.centers.len(), 7);
        assert_eq!(raw.timestamps.len(), 7);
        assert_eq!((raw.frame_width, raw.frame_height), (100, 100));
        let sampled: Vec<usize> = raw
            .centers
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|_| i))
            .collect();
        assert_eq!(sampled, vec![0, 3, 6]);
        assert!((raw.centers[3].unwrap().x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_missing_subject_carries_last_center() {
        let mut extractor = extractor(Box::new(Nothing), 0);
        let raw = extractor.extract_raw(ScriptedSource::new(3)).unwrap();
        assert_eq!(raw.centers, vec![Some(Point::ORIGIN); 3]);
    }

    #[test]
    fn test_mid_stream_error_aborts() {
        let mut source = ScriptedSource::new(4);
        source
            .frames
            .insert(2, Err(ExtractionError::ReadFailed("corrupt packet".into())));

        let mut extractor = extractor(Box::new(Walker { calls: 0 }), 0);
        assert!(matches!(
            extractor.extract(source),
            Err(ExtractionError::ReadFailed(_))
        ));
    }

    #[test]
    fn test_smoothed_output_covers_every_frame() {
        let mut extractor = extractor(Box::new(Walker { calls: 0 }), 20);
        let trajectory = extractor.extract(ScriptedSource::new(50)).unwrap();
        assert_eq!(trajectory.centers.len(), 50);
        assert_eq!(trajectory.timestamps.len(), 50);
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let mut extractor = extractor(Box::new(Nothing), 20);
        let result = extractor.extract_file(Path::new("/nonexistent/recording.mp4"));
        assert!(matches!(result, Err(ExtractionError::OpenFailed(_))));
    }
}
