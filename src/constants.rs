// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// An alternative to the fixed recording bitrate when the capture resolution
/// differs a lot from the reference 1080p/4K setups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// Get bitrate in kbps for a given resolution
    ///
    /// - SD (640x480): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080): Low=4, Medium=8, High=16 Mbps
    /// - 4K (3840x2160): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        match (get_resolution_tier(width), self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 15_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::FourK, BitratePreset::High) => 50_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    SD,
    HD,
    FullHD,
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Recording defaults
pub mod recording {
    /// Target video bitrate
    pub const VIDEO_BITRATE_KBPS: u32 = 5_000;

    /// Normal capture frame rate
    pub const DEFAULT_FPS: u32 = 30;

    /// Capture frame rate while slow motion is enabled
    pub const SLOW_MOTION_FPS: u32 = 120;

    /// Logical stretch applied to timestamps in slow motion
    pub const SLOW_MOTION_FACTOR: u32 = 4;

    /// Audio track bitrate
    pub const AUDIO_BITRATE_BPS: i32 = 64_000;

    /// Audio sample rate in normal mode
    pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

    /// Audio sample rate configured while slow motion is enabled
    pub const SLOW_MOTION_AUDIO_SAMPLE_RATE: u32 = 22_050;

    /// Mono audio
    pub const AUDIO_CHANNELS: u32 = 1;

    /// Log the slow-motion remap every N frames
    pub const SLOW_MOTION_LOG_INTERVAL: u64 = 100;
}

/// Detection defaults
pub mod detection {
    /// Confidence threshold applied to detector output
    pub const CONFIDENCE_THRESHOLD: f32 = 0.70;

    /// Class label of the tracked subject
    pub const SUBJECT_LABEL: &str = "person";

    /// Frames are downscaled to this maximum dimension before inference
    pub const MAX_DIMENSION: u32 = 640;
}

/// Trajectory smoothing defaults
pub mod trajectory {
    /// Trailing window used by jump rejection
    pub const WINDOW_SIZE: usize = 10;

    /// Maximum distance (pixels) from the window mean before a point is rejected
    pub const MAX_DEVIATION: f64 = 40.0;

    /// Median filter width
    pub const KERNEL_SIZE: usize = 5;

    /// Frames skipped between detections during offline extraction
    pub const FRAME_SKIP: usize = 20;
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum bytes queued in an encoder appsrc before the track reports busy
    pub const APPSRC_MAX_BYTES: u64 = 64 * 1024 * 1024;

    /// Maximum buffers held by capture appsinks
    pub const APPSINK_MAX_BUFFERS: u32 = 4;

    /// Raw format delivered to the recorder and detector
    pub const CAPTURE_FORMAT: &str = "BGRA";

    /// Samples buffered between the capture callbacks and delivery
    pub const SAMPLE_CHANNEL_CAPACITY: usize = 16;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Maximum wait for the muxer to drain after EOS
    pub const FINISH_TIMEOUT_SECS: u64 = 10;

    /// Wait for a decoded frame before treating the source as stalled
    pub const DECODE_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
