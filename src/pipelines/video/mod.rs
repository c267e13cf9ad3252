// SPDX-License-Identifier: MPL-2.0

//! Video recording pipeline
//!
//! This module provides the recording side of the application:
//! - [`recorder`]: capture session control, slow motion and detection sampling
//! - [`muxer`]: the writer session that turns timed samples into a container
//! - [`gst_writer`]: GStreamer encoder backend (hardware encoders preferred)

pub mod encoder_selection;
pub mod gst_writer;
pub mod muxer;
pub mod recorder;

pub use gst_writer::GstEncoderFactory;
pub use muxer::{
    AudioTrackConfig, EncoderBackend, EncoderFactory, FinishHandle, MediaMuxer, VideoTrackConfig,
    WriterState,
};
pub use recorder::{
    CapturePipeline, DetectionLog, RecorderState, RecordingEvent, SessionSettings,
    SlowMotionContext,
};

/// Log which encoders are installed
pub fn check_available_encoders() {
    crate::media::encoders::log_available_encoders();
}
