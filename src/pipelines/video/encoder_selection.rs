// SPDX-License-Identifier: MPL-2.0

//! Encoder selection for the recording writer
//!
//! Picks the video and audio encoders for a session from its track
//! configuration. Unlike preview-only setups, a session that asked for audio
//! cannot silently fall back to a video-only file.

use super::muxer::{AudioTrackConfig, VideoTrackConfig};
use crate::errors::WriterError;
use crate::media::encoders::{
    AudioCodec, SelectedAudioEncoder, select_aac_encoder,
    video::{SelectedVideoEncoder, select_video_encoder},
};
use tracing::info;

/// Selected encoders for recording
pub struct SelectedEncoders {
    pub video: SelectedVideoEncoder,
    /// `None` when the session carries no audio track
    pub audio: Option<SelectedAudioEncoder>,
}

/// Select the best available encoders for the given tracks
///
/// Fails with [`WriterError::EncoderNotAvailable`] when no encoder exists for
/// either requested track.
pub fn select_encoders(
    video: &VideoTrackConfig,
    audio: Option<&AudioTrackConfig>,
) -> Result<SelectedEncoders, WriterError> {
    let video_encoder = select_video_encoder(video.codec, video.bitrate_kbps)?;

    let audio_encoder = match audio {
        Some(config) => match config.codec {
            AudioCodec::AAC => Some(select_aac_encoder(config.bitrate_bps)?),
        },
        None => None,
    };

    info!(
        video = video_encoder.info.element_name,
        codec = video_encoder.info.codec.display_name(),
        hardware = video_encoder.info.is_hardware,
        audio = audio_encoder.as_ref().map(|a| a.element_name),
        "Selected encoders"
    );

    Ok(SelectedEncoders {
        video: video_encoder,
        audio: audio_encoder,
    })
}
