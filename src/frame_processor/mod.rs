// SPDX-License-Identifier: MPL-2.0

//! Frame processor module for subject detection
//!
//! Frames flow from the capture delivery context through a single-flight
//! [`DetectionGate`] to a dedicated [`DetectionWorker`] thread, which runs a
//! [`DetectionAdapter`] around an opaque [`ObjectDetector`]. The offline
//! extractor uses the same adapter synchronously.

pub mod gate;
pub mod tasks;
pub mod types;
pub mod worker;

pub use gate::{DetectionGate, GatePermit};
pub use tasks::qr_marker::QrMarkerDetector;
pub use tasks::subject_detector::{DetectionAdapter, ObjectDetector};
pub use types::{Detection, DetectionResult, FrameRegion, Point};
pub use worker::{DetectionJob, DetectionOutcome, DetectionWorker, SubmitError};
