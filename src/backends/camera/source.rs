// SPDX-License-Identifier: MPL-2.0

//! GStreamer capture source
//!
//! ```text
//! camera src ! videoconvert ! videoscale ! video/x-raw,format=BGRA ! appsink ─┐
//!                                                                            ├─▶ channel ─▶ sample-delivery ─▶ SampleSink
//! audio src  ! audioconvert ! audioresample ! audio/x-raw,S16LE    ! appsink ─┘
//! ```
//!
//! The appsink callbacks never block: when the delivery thread falls behind,
//! samples are dropped at the channel and counted.

use super::types::{
    AudioChunk, CameraFacing, CameraFormat, CaptureOrientation, Sample, SensorRotation,
    VideoFrame,
};
use super::{CameraSource, SampleSink};
use crate::constants::{pipeline as pipeline_consts, recording, timing};
use crate::errors::CameraError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Which device to capture from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptureDevice {
    /// PipeWire's default camera
    #[default]
    Default,
    /// PipeWire node by name or serial
    PipeWire(String),
    /// V4L2 device node such as `/dev/video0`
    V4l2(PathBuf),
    /// Synthetic moving pattern, no hardware needed
    TestPattern,
}

impl CaptureDevice {
    /// Parse a `--device` argument
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "default" => CaptureDevice::Default,
            "test" | "testsrc" => CaptureDevice::TestPattern,
            v if v.starts_with("/dev/") => CaptureDevice::V4l2(PathBuf::from(v)),
            v => CaptureDevice::PipeWire(v.to_string()),
        }
    }

    fn video_source(&self) -> String {
        match self {
            CaptureDevice::Default => "pipewiresrc do-timestamp=true".to_string(),
            CaptureDevice::PipeWire(target) => {
                format!("pipewiresrc target-object=\"{}\" do-timestamp=true", target)
            }
            CaptureDevice::V4l2(path) => {
                format!("v4l2src device=\"{}\" do-timestamp=true", path.display())
            }
            CaptureDevice::TestPattern => "videotestsrc is-live=true pattern=ball".to_string(),
        }
    }

    fn audio_source(&self) -> &'static str {
        match self {
            CaptureDevice::TestPattern => "audiotestsrc is-live=true wave=ticks",
            _ => "autoaudiosrc",
        }
    }
}

/// Capture request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub device: CaptureDevice,
    pub format: CameraFormat,
    /// Capture microphone audio alongside video
    pub audio: bool,
    pub audio_rate: u32,
    pub facing: CameraFacing,
    /// Overrides the rotation implied by `facing`
    pub rotation: Option<SensorRotation>,
}

impl CaptureConfig {
    pub fn new(device: CaptureDevice, format: CameraFormat) -> Self {
        Self {
            device,
            format,
            audio: true,
            audio_rate: recording::AUDIO_SAMPLE_RATE,
            facing: CameraFacing::default(),
            rotation: None,
        }
    }

    /// `gst-launch` style description of the capture pipeline
    pub fn pipeline_description(&self) -> String {
        let video = format!(
            "{} ! videoconvert ! videoscale ! \
             video/x-raw,format={},width={},height={},framerate={}/{} ! \
             appsink name=videosink",
            self.device.video_source(),
            pipeline_consts::CAPTURE_FORMAT,
            self.format.width,
            self.format.height,
            self.format.framerate.num,
            self.format.framerate.denom,
        );
        if !self.audio {
            return video;
        }
        format!(
            "{} {} ! audioconvert ! audioresample ! \
             audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! \
             appsink name=audiosink",
            video,
            self.device.audio_source(),
            self.audio_rate,
            recording::AUDIO_CHANNELS,
        )
    }

    pub fn orientation(&self) -> CaptureOrientation {
        let mut orientation = CaptureOrientation::for_facing(self.facing);
        if let Some(rotation) = self.rotation {
            orientation.rotation = rotation;
        }
        orientation
    }
}

/// Camera (and microphone) capture through a GStreamer pipeline
pub struct GstCameraSource {
    config: CaptureConfig,
    pipeline: Option<gst::Pipeline>,
    sinks: Vec<AppSink>,
    delivery: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl GstCameraSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            pipeline: None,
            sinks: Vec::new(),
            delivery: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Samples discarded because delivery fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn appsink(pipeline: &gst::Pipeline, name: &str) -> Result<AppSink, CameraError> {
        let appsink = pipeline
            .by_name(name)
            .ok_or_else(|| CameraError::InitializationFailed(format!("Failed to get {}", name)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CameraError::InitializationFailed(format!("Failed to cast {}", name)))?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline_consts::APPSINK_MAX_BUFFERS);
        appsink.set_property("drop", false);
        appsink.set_property("enable-last-sample", false);
        Ok(appsink)
    }

    fn connect_video(&self, appsink: &AppSink, sender: mpsc::Sender<Sample>) {
        let dropped = Arc::clone(&self.dropped);
        let counter = AtomicU64::new(0);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = counter.fetch_add(1, Ordering::Relaxed);
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let frame = match VideoFrame::from_gst_sample(&sample) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(frame = frame_num, error = %e, "Skipping unreadable video sample");
                            return Ok(gst::FlowSuccess::Ok);
                        }
                    };
                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(frame = frame_num, pts = %frame.pts, "Video sample");
                    }
                    forward(&sender, Sample::Video(frame), &dropped)
                })
                .build(),
        );
    }

    fn connect_audio(&self, appsink: &AppSink, sender: mpsc::Sender<Sample>) {
        let dropped = Arc::clone(&self.dropped);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match AudioChunk::from_gst_sample(&sample) {
                        Ok(chunk) => forward(&sender, Sample::Audio(chunk), &dropped),
                        Err(e) => {
                            warn!(error = %e, "Skipping unreadable audio sample");
                            Ok(gst::FlowSuccess::Ok)
                        }
                    }
                })
                .build(),
        );
    }

    fn teardown(&mut self) {
        for sink in self.sinks.drain(..) {
            sink.set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        }
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
        // Clearing the callbacks dropped every sender, so the thread exits
        if let Some(handle) = self.delivery.take()
            && handle.join().is_err()
        {
            error!("Sample delivery thread panicked");
        }
    }
}

fn forward(
    sender: &mpsc::Sender<Sample>,
    sample: Sample,
    dropped: &AtomicU64,
) -> Result<gst::FlowSuccess, gst::FlowError> {
    match sender.try_send(sample) {
        Ok(()) => Ok(gst::FlowSuccess::Ok),
        Err(mpsc::error::TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total % timing::FRAME_LOG_INTERVAL == 1 {
                warn!(total, "Sample delivery behind, dropping samples");
            }
            Ok(gst::FlowSuccess::Ok)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(gst::FlowError::Eos),
    }
}

impl CameraSource for GstCameraSource {
    fn start(&mut self, sink: Arc<dyn SampleSink>) -> Result<(), CameraError> {
        if self.pipeline.is_some() {
            return Err(CameraError::InitializationFailed(
                "Capture already running".into(),
            ));
        }

        gst::init().map_err(|e| CameraError::InitializationFailed(e.to_string()))?;

        let description = self.config.pipeline_description();
        info!(device = ?self.config.device, format = %self.config.format, "Starting capture");
        debug!(pipeline = %description, "Capture pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| CameraError::InitializationFailed(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CameraError::InitializationFailed("Not a pipeline".into()))?;

        let (sender, mut receiver) =
            mpsc::channel::<Sample>(pipeline_consts::SAMPLE_CHANNEL_CAPACITY);

        let video_sink = Self::appsink(&pipeline, "videosink")?;
        let audio_sink = if self.config.audio {
            Some(Self::appsink(&pipeline, "audiosink")?)
        } else {
            None
        };

        self.connect_video(&video_sink, sender.clone());
        self.sinks.push(video_sink);
        if let Some(audio_sink) = audio_sink {
            self.connect_audio(&audio_sink, sender.clone());
            self.sinks.push(audio_sink);
        }
        drop(sender);

        let delivery = std::thread::Builder::new()
            .name("sample-delivery".into())
            .spawn(move || {
                while let Some(sample) = receiver.blocking_recv() {
                    sink.deliver(sample);
                }
                debug!("Sample delivery finished");
            })
            .map_err(|e| CameraError::InitializationFailed(e.to_string()))?;
        self.delivery = Some(delivery);
        self.pipeline = Some(pipeline.clone());

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            self.teardown();
            return Err(CameraError::InitializationFailed(format!(
                "Failed to start capture: {}",
                e
            )));
        }
        let (result, state, _) =
            pipeline.state(gst::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
        if result.is_err() {
            let reason = pipeline
                .bus()
                .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
                .and_then(|msg| match msg.view() {
                    gst::MessageView::Error(err) => Some(err.error().to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| format!("Pipeline stuck in {:?}", state));
            self.teardown();
            return Err(if reason.contains("not found") || reason.contains("No such") {
                CameraError::NoCameraFound
            } else {
                CameraError::InitializationFailed(reason)
            });
        }

        info!(orientation = ?self.orientation(), "Capture running");
        Ok(())
    }

    fn stop(&mut self) {
        if self.pipeline.is_none() {
            return;
        }
        info!(dropped = self.dropped_samples(), "Stopping capture");
        self.teardown();
    }

    fn orientation(&self) -> CaptureOrientation {
        self.config.orientation()
    }

    fn poll_fault(&mut self) -> Option<CameraError> {
        let bus = self.pipeline.as_ref()?.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
        {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    error!(error = %err.error(), debug = ?err.debug(), "Capture error");
                    return Some(CameraError::Disconnected);
                }
                gst::MessageView::Eos(_) => {
                    warn!("Capture source ended");
                    return Some(CameraError::Disconnected);
                }
                _ => {}
            }
        }
        None
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Framerate;

    fn format() -> CameraFormat {
        CameraFormat {
            width: 1280,
            height: 720,
            framerate: Framerate::from_int(30),
        }
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!(CaptureDevice::parse("default"), CaptureDevice::Default);
        assert_eq!(CaptureDevice::parse("test"), CaptureDevice::TestPattern);
        assert_eq!(
            CaptureDevice::parse("/dev/video2"),
            CaptureDevice::V4l2(PathBuf::from("/dev/video2"))
        );
        assert_eq!(
            CaptureDevice::parse("usb-cam"),
            CaptureDevice::PipeWire("usb-cam".into())
        );
    }

    #[test]
    fn test_video_only_description() {
        let mut config = CaptureConfig::new(CaptureDevice::TestPattern, format());
        config.audio = false;
        let description = config.pipeline_description();
        assert!(description.starts_with("videotestsrc is-live=true"));
        assert!(description.contains("format=BGRA,width=1280,height=720,framerate=30/1"));
        assert!(!description.contains("audiosink"));
    }

    #[test]
    fn test_audio_branch_is_mono_s16() {
        let mut config = CaptureConfig::new(CaptureDevice::V4l2("/dev/video0".into()), format());
        config.audio_rate = 22_050;
        let description = config.pipeline_description();
        assert!(description.contains("v4l2src device=\"/dev/video0\""));
        assert!(description.contains("format=S16LE,layout=interleaved,rate=22050,channels=1"));
        assert!(description.ends_with("appsink name=audiosink"));
    }

    #[test]
    fn test_orientation_override() {
        let mut config = CaptureConfig::new(CaptureDevice::Default, format());
        config.facing = CameraFacing::Front;
        assert_eq!(
            config.orientation(),
            CaptureOrientation {
                rotation: SensorRotation::Rotate90,
                mirrored: true,
            }
        );
        config.rotation = Some(SensorRotation::None);
        assert_eq!(config.orientation().image_orientation_tag(), "flip-rotate-0");
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut source = GstCameraSource::new(CaptureConfig::new(CaptureDevice::Default, format()));
        source.stop();
        assert!(source.poll_fault().is_none());
        assert_eq!(source.dropped_samples(), 0);
    }
}
