// SPDX-License-Identifier: MPL-2.0

//! Video encoder selection
//!
//! Recordings use HEVC when an encoder for it is installed and fall back to
//! H.264 otherwise. Hardware encoders are preferred within each codec.

use crate::errors::WriterError;
use gstreamer as gst;
use gstreamer::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Video codecs a recording can be written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// HEVC/H.265 (preferred, better compression)
    HEVC,
    /// H.264 (best compatibility)
    H264,
}

impl VideoCodec {
    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "h265parse",
            VideoCodec::H264 => "h264parse",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "H.265",
            VideoCodec::H264 => "H.264",
        }
    }
}

/// Which codec the recorder should ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecPreference {
    /// HEVC when available, H.264 otherwise
    #[default]
    Auto,
    H264,
    HEVC,
}

impl CodecPreference {
    fn accepts(&self, codec: VideoCodec) -> bool {
        match self {
            CodecPreference::Auto => true,
            CodecPreference::H264 => codec == VideoCodec::H264,
            CodecPreference::HEVC => codec == VideoCodec::HEVC,
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: &'static str,
    pub codec: VideoCodec,
    pub is_hardware: bool,
}

/// Encoder candidates in priority order
const VIDEO_ENCODERS: &[(&str, VideoCodec, bool)] = &[
    // Hardware HEVC
    ("vah265enc", VideoCodec::HEVC, true),
    ("vaapih265enc", VideoCodec::HEVC, true),
    ("nvh265enc", VideoCodec::HEVC, true),
    ("qsvh265enc", VideoCodec::HEVC, true),
    ("v4l2h265enc", VideoCodec::HEVC, true),
    // Software HEVC
    ("x265enc", VideoCodec::HEVC, false),
    // Hardware H.264
    ("vah264enc", VideoCodec::H264, true),
    ("vaapih264enc", VideoCodec::H264, true),
    ("nvh264enc", VideoCodec::H264, true),
    ("qsvh264enc", VideoCodec::H264, true),
    ("v4l2h264enc", VideoCodec::H264, true),
    // Software H.264
    ("x264enc", VideoCodec::H264, false),
    ("openh264enc", VideoCodec::H264, false),
];

/// Selected video encoder with its parser
pub struct SelectedVideoEncoder {
    pub encoder: gst::Element,
    pub parser: Option<gst::Element>,
    pub info: EncoderInfo,
}

/// List installed encoders in priority order
pub fn enumerate_video_encoders() -> Vec<EncoderInfo> {
    if gst::init().is_err() {
        return Vec::new();
    }

    VIDEO_ENCODERS
        .iter()
        .filter(|(name, _, _)| gst::ElementFactory::find(name).is_some())
        .map(|&(element_name, codec, is_hardware)| EncoderInfo {
            element_name,
            codec,
            is_hardware,
        })
        .collect()
}

/// Create the best installed encoder allowed by `preference`
pub fn select_video_encoder(
    preference: CodecPreference,
    bitrate_kbps: u32,
) -> Result<SelectedVideoEncoder, WriterError> {
    gst::init().map_err(|e| WriterError::OpenFailed(format!("GStreamer init failed: {}", e)))?;

    for &(element_name, codec, is_hardware) in VIDEO_ENCODERS {
        if !preference.accepts(codec) {
            continue;
        }
        let Ok(encoder) = gst::ElementFactory::make(element_name).build() else {
            continue;
        };

        info!(
            encoder = %element_name,
            codec = codec.display_name(),
            hardware = is_hardware,
            bitrate_kbps,
            "Selected video encoder"
        );
        configure_video_encoder(&encoder, element_name, bitrate_kbps);

        let parser = match gst::ElementFactory::make(codec.parser_name()).build() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Failed to create parser {}: {}", codec.parser_name(), e);
                None
            }
        };

        return Ok(SelectedVideoEncoder {
            encoder,
            parser,
            info: EncoderInfo {
                element_name,
                codec,
                is_hardware,
            },
        });
    }

    Err(WriterError::EncoderNotAvailable(
        "No H.265 or H.264 encoder installed. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264".to_string(),
    ))
}

/// Apply the target bitrate using each encoder's own property conventions
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, bitrate_kbps: u32) {
    match encoder_name {
        "x264enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "x265enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        // Old VA-API plugin takes an integer rate-control
        "vaapih264enc" | "vaapih265enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "vah264enc" | "vah265enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "nvh264enc" | "nvh265enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
            encoder.set_property_from_str("rc-mode", "vbr");
        }
        "qsvh264enc" | "qsvh265enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "openh264enc" => {
            encoder.set_property_from_str("rate-control", "bitrate");
            encoder.set_property("bitrate", bitrate_kbps * 1000);
            encoder.set_property_from_str("usage-type", "camera");
        }
        _ => {
            debug!(encoder = %encoder_name, "Using default encoder configuration");
            return;
        }
    }
    debug!(encoder = %encoder_name, bitrate_kbps, "Configured video encoder");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hevc_preferred_over_h264() {
        let first_h264 = VIDEO_ENCODERS
            .iter()
            .position(|(_, codec, _)| *codec == VideoCodec::H264)
            .unwrap();
        assert!(
            VIDEO_ENCODERS[..first_h264]
                .iter()
                .all(|(_, codec, _)| *codec == VideoCodec::HEVC)
        );
    }

    #[test]
    fn test_preference_filter() {
        assert!(CodecPreference::Auto.accepts(VideoCodec::HEVC));
        assert!(CodecPreference::H264.accepts(VideoCodec::H264));
        assert!(!CodecPreference::H264.accepts(VideoCodec::HEVC));
    }

    #[test]
    fn test_parsers() {
        assert_eq!(VideoCodec::H264.parser_name(), "h264parse");
        assert_eq!(VideoCodec::HEVC.parser_name(), "h265parse");
    }
}
