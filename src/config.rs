// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::{CameraFacing, Framerate, Rational, SensorRotation};
use crate::constants::{BitratePreset, detection, recording, trajectory};
use crate::errors::StorageError;
use crate::media::encoders::CodecPreference;
use crate::pipelines::trajectory::{ExtractorConfig, SmootherParams};
use crate::pipelines::video::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory under the user's config dir
pub const CONFIG_DIR_NAME: &str = "trackcam";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Capture format settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    pub width: u32,
    pub height: u32,
    /// Frame rate in normal mode
    pub framerate: u32,
    /// Frame rate requested from the camera while slow motion is on
    pub slow_motion_framerate: u32,
    /// Playback stretch applied in slow motion
    pub slow_motion_factor: u32,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: recording::DEFAULT_FPS,
            slow_motion_framerate: recording::SLOW_MOTION_FPS,
            slow_motion_factor: recording::SLOW_MOTION_FACTOR,
        }
    }
}

/// Live subject detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub enabled: bool,
    /// Detector label treated as the subject
    pub subject_label: String,
    pub confidence_threshold: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            subject_label: detection::SUBJECT_LABEL.to_string(),
            confidence_threshold: detection::CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub format: FormatSettings,
    /// Video codec to ask for (HEVC preferred under `auto`)
    pub codec: CodecPreference,
    /// Resolution-scaled bitrate; `None` records at the fixed default rate
    pub bitrate_preset: Option<BitratePreset>,
    /// Record microphone audio
    pub audio: bool,
    pub facing: CameraFacing,
    /// Overrides the sensor rotation implied by `facing`
    pub rotation: Option<SensorRotation>,
    pub detection: DetectionSettings,
    pub smoother: SmootherParams,
    /// Frames skipped between detections in offline extraction
    pub frame_skip: usize,
    /// Where finished recordings go; defaults to `<videos>/Trackcam`
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: FormatSettings::default(),
            codec: CodecPreference::default(),
            bitrate_preset: None,
            audio: true,
            facing: CameraFacing::default(),
            rotation: None,
            detection: DetectionSettings::default(),
            smoother: SmootherParams::default(),
            frame_skip: trajectory::FRAME_SKIP,
            output_dir: None,
        }
    }
}

impl Config {
    /// `<config dir>/trackcam/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from the default location; unreadable files are logged and ignored
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable config");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_preset
            .map(|preset| preset.bitrate_kbps(self.format.width))
            .unwrap_or(recording::VIDEO_BITRATE_KBPS)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(crate::storage::default_video_dir)
    }

    /// Recording parameters for a new session
    pub fn to_session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::new(self.format.width, self.format.height);
        settings.framerate = Framerate::from_int(self.format.framerate);
        settings.slow_motion_framerate = Framerate::from_int(self.format.slow_motion_framerate);
        if let Some(factor) = Rational::from_int(self.format.slow_motion_factor) {
            settings.slow_motion_factor = factor;
        } else {
            warn!("Slow motion factor must be positive, keeping default");
        }
        settings.codec = self.codec;
        settings.bitrate_kbps = self.bitrate_kbps();
        settings.audio = self.audio;
        settings
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            frame_skip: self.frame_skip,
            smoother: self.smoother,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "audio": false, "format": { "width": 1920 } }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.audio);
        assert_eq!(config.format.width, 1920);
        assert_eq!(config.format.height, 720);
        assert_eq!(config.smoother, SmootherParams::default());
    }

    #[test]
    fn test_session_settings_follow_config() {
        let mut config = Config::default();
        config.format.slow_motion_framerate = 240;
        config.format.slow_motion_factor = 8;
        config.bitrate_preset = Some(BitratePreset::High);

        let settings = config.to_session_settings();
        assert_eq!(settings.bitrate_kbps, 10_000);
        assert_eq!(settings.video_track(true).framerate, Framerate::from_int(30));
        assert_eq!(settings.video_track(false).framerate, Framerate::from_int(30));
    }

    #[test]
    fn test_zero_factor_keeps_default() {
        let mut config = Config::default();
        config.format.slow_motion_factor = 0;
        assert_eq!(
            config.to_session_settings().slow_motion_factor,
            Rational::from_int(recording::SLOW_MOTION_FACTOR).unwrap()
        );
    }
}
