// SPDX-License-Identifier: MPL-2.0

//! Error types for recording, detection and trajectory extraction
//!
//! Fatal categories (configuration, writer setup, offline decode) are returned
//! to the immediate caller. Detection faults are recoverable: they are logged
//! and replaced by last-known centers, never propagated out of a session.

use std::fmt;

/// Capture configuration errors, fatal to session start
#[derive(Debug, Clone)]
pub enum CameraError {
    /// No capture device could be opened
    NoCameraFound,
    /// Capture pipeline could not be built or started
    InitializationFailed(String),
    /// Capture stopped unexpectedly
    Disconnected,
}

/// Writer (muxer/encoder) errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    /// Output could not be opened or a track could not be added
    OpenFailed(String),
    /// Encoder session could not be started
    StartFailed(String),
    /// No encoder for the requested codec
    EncoderNotAvailable(String),
    /// Operation issued in the wrong session state
    InvalidState(&'static str),
    /// A track failed or was cancelled mid-session
    Faulted(String),
    /// Flushing/closing the container failed
    FinishFailed(String),
}

/// Recording lifecycle errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// A recording (or countdown) is already in progress
    AlreadyRecording,
    /// Start was requested without an async runtime to schedule on
    NoRuntime,
    /// Writer failed to open or start
    Writer(WriterError),
    /// The recording completed but could not be stored
    Storage(StorageError),
}

/// Detection faults (always recoverable)
#[derive(Debug, Clone)]
pub enum DetectionError {
    /// Frame could not be converted to an image
    ConversionFailed(String),
    /// The detector reported an error
    InferenceFailed(String),
}

/// Offline trajectory extraction errors
#[derive(Debug, Clone)]
pub enum ExtractionError {
    /// Source file could not be opened
    OpenFailed(String),
    /// No decodable video output could be attached
    NoVideoOutput(String),
    /// Decoding could not begin
    StartFailed(String),
    /// Decoding failed part way through
    ReadFailed(String),
}

/// Persistence errors
#[derive(Debug, Clone)]
pub enum StorageError {
    Io(String),
    Serialize(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
        }
    }
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterError::OpenFailed(msg) => write!(f, "Failed to open writer: {}", msg),
            WriterError::StartFailed(msg) => write!(f, "Failed to start writing: {}", msg),
            WriterError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            WriterError::InvalidState(state) => write!(f, "Writer is {}", state),
            WriterError::Faulted(msg) => write!(f, "Writer faulted: {}", msg),
            WriterError::FinishFailed(msg) => write!(f, "Failed to finish writing: {}", msg),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NoRuntime => write!(f, "No async runtime available"),
            RecordingError::Writer(e) => write!(f, "{}", e),
            RecordingError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::ConversionFailed(msg) => write!(f, "Image conversion failed: {}", msg),
            DetectionError::InferenceFailed(msg) => write!(f, "Inference failed: {}", msg),
        }
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::OpenFailed(msg) => write!(f, "Cannot open source: {}", msg),
            ExtractionError::NoVideoOutput(msg) => write!(f, "Cannot add video output: {}", msg),
            ExtractionError::StartFailed(msg) => write!(f, "Cannot start reading: {}", msg),
            ExtractionError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(msg) => write!(f, "I/O error: {}", msg),
            StorageError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
impl std::error::Error for WriterError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for DetectionError {}
impl std::error::Error for ExtractionError {}
impl std::error::Error for StorageError {}

impl From<WriterError> for RecordingError {
    fn from(err: WriterError) -> Self {
        RecordingError::Writer(err)
    }
}

impl From<StorageError> for RecordingError {
    fn from(err: StorageError) -> Self {
        RecordingError::Storage(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialize(err.to_string())
    }
}
