// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection

use super::audio::AAC_ENCODERS;
use super::video::enumerate_video_encoders;
use gstreamer as gst;
use tracing::info;

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().is_ok() && gst::ElementFactory::find(element_name).is_some()
}

/// Log the encoders and muxer a recording can use
pub fn log_available_encoders() {
    let video: Vec<String> = enumerate_video_encoders()
        .iter()
        .map(|e| {
            format!(
                "{} ({}{})",
                e.element_name,
                e.codec.display_name(),
                if e.is_hardware { ", HW" } else { "" }
            )
        })
        .collect();

    let audio: Vec<&str> = AAC_ENCODERS
        .iter()
        .copied()
        .filter(|name| is_element_available(name))
        .collect();

    info!(
        video = ?video,
        audio = ?audio,
        mp4mux = is_element_available("mp4mux"),
        "Available encoders"
    );
}
