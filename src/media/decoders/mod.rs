// SPDX-License-Identifier: GPL-3.0-only

//! Decode sources for offline trajectory extraction
//!
//! A [`FrameSource`] yields decoded video frames in presentation order. The
//! production implementation is [`GstFileFrameSource`], a GStreamer decoder
//! reading a recorded file.

mod file;

pub use file::GstFileFrameSource;

use crate::backends::camera::types::VideoFrame;
use crate::errors::ExtractionError;

/// Sequential source of decoded frames
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the stream has ended
    ///
    /// A decode failure part way through is an error, never an early end of
    /// stream.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, ExtractionError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, ExtractionError> {
        (**self).next_frame()
    }
}
