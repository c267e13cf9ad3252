// SPDX-License-Identifier: MPL-2.0

//! Media encoder selection and configuration
//!
//! - Video: HEVC preferred, H.264 fallback, hardware first within a codec
//! - Audio: AAC

pub mod audio;
pub mod detection;
pub mod video;

pub use audio::{AudioCodec, SelectedAudioEncoder, select_aac_encoder};
pub use detection::log_available_encoders;
pub use video::{CodecPreference, EncoderInfo, VideoCodec, select_video_encoder};
