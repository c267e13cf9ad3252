// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer file decoder
//!
//! `filesrc ! decodebin ! videoconvert ! appsink`, pulled synchronously with
//! clock sync disabled so frames come out as fast as they decode. The
//! `filesrc` is built as an element so any path works as its location.

use super::FrameSource;
use crate::backends::camera::types::{VideoFrame, sample_time};
use crate::constants::{pipeline as pipeline_consts, timing};
use crate::errors::ExtractionError;
use gstreamer::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct GstFileFrameSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frames: u64,
}

/// Decoder pipeline reading `path`
fn build_pipeline(path: &Path) -> Result<gstreamer::Pipeline, ExtractionError> {
    let pipeline_str = format!(
        "decodebin name=decoder ! queue ! videoconvert ! \
         video/x-raw,format={} ! appsink name=videosink sync=false max-buffers={}",
        pipeline_consts::CAPTURE_FORMAT,
        pipeline_consts::APPSINK_MAX_BUFFERS,
    );

    let pipeline = gstreamer::parse::launch(&pipeline_str)
        .map_err(|e| ExtractionError::OpenFailed(format!("Failed to create pipeline: {}", e)))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| ExtractionError::OpenFailed("Failed to downcast to Pipeline".into()))?;

    let location = path.to_string_lossy();
    let filesrc = gstreamer::ElementFactory::make("filesrc")
        .name("source")
        .property("location", &*location)
        .build()
        .map_err(|e| ExtractionError::OpenFailed(format!("Failed to create filesrc: {}", e)))?;
    let decoder = pipeline
        .by_name("decoder")
        .ok_or_else(|| ExtractionError::OpenFailed("Failed to find decodebin".into()))?;
    pipeline
        .add(&filesrc)
        .map_err(|e| ExtractionError::OpenFailed(format!("Failed to add filesrc: {}", e)))?;
    filesrc
        .link(&decoder)
        .map_err(|_| ExtractionError::OpenFailed("Failed to link filesrc to decodebin".into()))?;
    Ok(pipeline)
}

impl GstFileFrameSource {
    /// Open `path` and preroll the decoder
    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        info!(path = %path.display(), "Opening recording for extraction");

        gstreamer::init()
            .map_err(|e| ExtractionError::OpenFailed(format!("GStreamer init failed: {}", e)))?;

        if !path.is_file() {
            return Err(ExtractionError::OpenFailed(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let pipeline = build_pipeline(path)?;
        let appsink = pipeline
            .by_name("videosink")
            .and_then(|e| e.downcast::<gstreamer_app::AppSink>().ok())
            .ok_or_else(|| ExtractionError::NoVideoOutput("Failed to find video appsink".into()))?;

        let source = Self {
            pipeline,
            appsink,
            frames: 0,
        };
        source.preroll()?;
        Ok(source)
    }

    /// Pause, wait for preroll (or an error), then start playing
    fn preroll(&self) -> Result<(), ExtractionError> {
        self.pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|e| ExtractionError::StartFailed(format!("Failed to pause pipeline: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| ExtractionError::StartFailed("No bus on pipeline".into()))?;
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_secs(timing::START_TIMEOUT_SECS);

        loop {
            if std::time::Instant::now() >= deadline {
                return Err(ExtractionError::StartFailed(
                    "Timeout waiting for decoder preroll".into(),
                ));
            }
            let Some(msg) = bus.timed_pop(gstreamer::ClockTime::from_mseconds(100)) else {
                continue;
            };
            use gstreamer::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    // decodebin reports a file without a usable video stream
                    // as a not-linked or missing-plugin error
                    return Err(ExtractionError::NoVideoOutput(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                MessageView::AsyncDone(_) => break,
                _ => {}
            }
        }

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| ExtractionError::StartFailed(format!("Failed to start pipeline: {:?}", e)))?;
        debug!("Decoder prerolled");
        Ok(())
    }

    /// Pending error on the bus, if any
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

impl FrameSource for GstFileFrameSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, ExtractionError> {
        let timeout = gstreamer::ClockTime::from_mseconds(
            timing::DECODE_FRAME_TIMEOUT.as_millis() as u64,
        );

        while let Some(sample) = self.appsink.try_pull_sample(timeout) {
            if sample_time(&sample).is_none() {
                warn!(frame = self.frames, "Skipping decoded frame without a timestamp");
                continue;
            }
            let frame = VideoFrame::from_gst_sample(&sample).map_err(ExtractionError::ReadFailed)?;
            self.frames += 1;
            return Ok(Some(frame));
        }

        if let Some(error) = self.bus_error() {
            return Err(ExtractionError::ReadFailed(error));
        }
        if self.appsink.is_eos() {
            debug!(frames = self.frames, "Decoder reached end of stream");
            return Ok(None);
        }
        Err(ExtractionError::ReadFailed(
            "Timed out waiting for a decoded frame".into(),
        ))
    }
}

impl Drop for GstFileFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?e, "Failed to stop decoder pipeline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_not_parsed() {
        let _ = gstreamer::init();
        if gstreamer::ElementFactory::find("decodebin").is_none() {
            return;
        }

        let path = Path::new("/tmp/take \"one\" ! fakesink.mp4");
        let pipeline = build_pipeline(path).unwrap();
        let source = pipeline.by_name("source").unwrap();
        assert_eq!(
            source.property::<Option<String>>("location").as_deref(),
            path.to_str()
        );
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = GstFileFrameSource::open(&dir.path().join("missing.mp4"));
        assert!(matches!(result, Err(ExtractionError::OpenFailed(_))));
    }
}
