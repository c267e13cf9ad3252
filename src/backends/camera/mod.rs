// SPDX-License-Identifier: MPL-2.0

//! Camera capture abstraction
//!
//! ```text
//! ┌─────────────────────┐
//! │    CameraSource     │  ← device lifecycle, orientation
//! └──────────┬──────────┘
//!            │ Sample::Video / Sample::Audio
//!            ▼
//! ┌─────────────────────┐
//! │     SampleSink      │  ← e.g. the capture pipeline
//! └─────────────────────┘
//! ```
//!
//! Sources deliver samples from a single thread, in the order they were
//! captured. Video and audio share that thread so a sink never sees them
//! concurrently.

pub mod source;
pub mod types;

pub use source::{CaptureConfig, CaptureDevice, GstCameraSource};
pub use types::*;

use crate::errors::CameraError;
use std::sync::Arc;

/// Receives captured samples
pub trait SampleSink: Send + Sync {
    /// Called once per sample on the source's delivery thread
    fn deliver(&self, sample: Sample);
}

/// A running capture device
pub trait CameraSource {
    /// Open the device and begin delivering samples to `sink`
    fn start(&mut self, sink: Arc<dyn SampleSink>) -> Result<(), CameraError>;

    /// Stop capture and release the device
    ///
    /// No sample is delivered after this returns.
    fn stop(&mut self);

    /// Sensor placement of the opened device
    fn orientation(&self) -> CaptureOrientation;

    /// Fault reported by the device since the last call, if any
    fn poll_fault(&mut self) -> Option<CameraError> {
        None
    }
}
