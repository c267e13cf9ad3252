// SPDX-License-Identifier: MPL-2.0

//! AAC audio encoder selection

use crate::errors::WriterError;
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// Audio codecs a recording can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    AAC,
}

impl AudioCodec {
    /// Caps produced by the encoder
    pub fn caps_string(&self) -> &'static str {
        match self {
            AudioCodec::AAC => "audio/mpeg,mpegversion=4",
        }
    }
}

/// AAC encoders in priority order
pub const AAC_ENCODERS: &[&str] = &["fdkaacenc", "avenc_aac", "voaacenc", "faac"];

/// Selected audio encoder with configuration
pub struct SelectedAudioEncoder {
    pub encoder: gst::Element,
    pub element_name: &'static str,
    pub codec: AudioCodec,
}

/// Create the first installed AAC encoder, configured for `bitrate_bps`
pub fn select_aac_encoder(bitrate_bps: i32) -> Result<SelectedAudioEncoder, WriterError> {
    gst::init().map_err(|e| WriterError::OpenFailed(format!("GStreamer init failed: {}", e)))?;

    for &element_name in AAC_ENCODERS {
        if let Ok(encoder) = gst::ElementFactory::make(element_name).build() {
            info!(encoder = %element_name, bitrate_bps, "Selected audio encoder");
            configure_aac_encoder(&encoder, element_name, bitrate_bps);
            return Ok(SelectedAudioEncoder {
                encoder,
                element_name,
                codec: AudioCodec::AAC,
            });
        }
    }

    Err(WriterError::EncoderNotAvailable(
        "No AAC encoder installed. Please install gstreamer1-plugins-bad (fdkaacenc) or gstreamer1-libav (avenc_aac)".to_string(),
    ))
}

fn configure_aac_encoder(encoder: &gst::Element, encoder_name: &str, bitrate_bps: i32) {
    // All supported AAC encoders take bits per second, with differing integer types
    if encoder.has_property("bitrate") {
        encoder.set_property_from_str("bitrate", &bitrate_bps.to_string());
        debug!("Configured {}: bitrate={} bps", encoder_name, bitrate_bps);
    } else {
        debug!("{} has no bitrate property, using defaults", encoder_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_caps() {
        assert!(AudioCodec::AAC.caps_string().contains("audio/mpeg"));
    }

    #[test]
    fn test_fdk_preferred() {
        assert_eq!(AAC_ENCODERS[0], "fdkaacenc");
    }
}
