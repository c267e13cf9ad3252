// SPDX-License-Identifier: GPL-3.0-only

//! Recording persistence
//!
//! Recordings are written to a unique scratch path first. Once the writer has
//! closed the file, a [`PersistenceSink`] gives it its final place together
//! with the session's detection log.

use crate::errors::StorageError;
use crate::frame_processor::DetectionResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Folder created inside the user's videos directory
pub const DEFAULT_SAVE_FOLDER: &str = "Trackcam";

/// Suffix of the detection log written beside each recording
pub const DETECTION_LOG_SUFFIX: &str = "detections.json";

/// Detection log as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDetectionLog {
    /// Frame size the normalized centers refer to
    pub width: u32,
    pub height: u32,
    pub entries: Vec<DetectionResult>,
}

impl StoredDetectionLog {
    pub fn new(width: u32, height: u32, entries: Vec<DetectionResult>) -> Self {
        Self {
            width,
            height,
            entries,
        }
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Final destination for finished recordings
///
/// Invoked once per completed recording, off the async runtime's worker
/// threads, so implementations may block on I/O.
pub trait PersistenceSink: Send + Sync {
    /// Take ownership of `file` and store it with its detection log
    ///
    /// Returns where the recording ended up.
    fn store(&self, file: &Path, log: &StoredDetectionLog) -> Result<PathBuf, StorageError>;
}

/// Moves recordings into a directory as `VID_<timestamp>.mp4`
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sink targeting `<videos>/Trackcam`
    pub fn in_video_dir() -> Self {
        Self::new(default_video_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First free `VID_<timestamp>[_n].mp4` in the target directory
    fn destination(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut candidate = self.dir.join(format!("VID_{}.mp4", timestamp));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("VID_{}_{}.mp4", timestamp, n));
            n += 1;
        }
        candidate
    }
}

impl PersistenceSink for DirectorySink {
    fn store(&self, file: &Path, log: &StoredDetectionLog) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let destination = self.destination();

        move_file(file, &destination)?;
        log.save(&detection_log_path(&destination))?;

        info!(
            path = %destination.display(),
            entries = log.entries.len(),
            "Recording stored"
        );
        Ok(destination)
    }
}

/// `<dir>/<stem>.detections.json` for a recording at `video`
pub fn detection_log_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    video.with_file_name(format!("{}.{}", stem, DETECTION_LOG_SUFFIX))
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    debug!(from = %from.display(), to = %to.display(), "Rename failed, copying");
    std::fs::copy(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        warn!(error = %e, path = %from.display(), "Failed to remove scratch recording");
    }
    Ok(())
}

/// Fresh unique `<dir>/<uuid>.mp4`
pub fn scratch_output_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.mp4", uuid::Uuid::new_v4()))
}

/// Default directory for finished recordings
pub fn default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::MediaTime;
    use crate::frame_processor::Point;

    fn log() -> StoredDetectionLog {
        StoredDetectionLog::new(
            640,
            480,
            vec![
                DetectionResult::new(MediaTime::new(0, 30), vec![Point::ORIGIN]),
                DetectionResult::new(MediaTime::new(1, 30), vec![Point::new(0.5, 0.25)]),
            ],
        )
    }

    #[test]
    fn test_scratch_paths_are_unique() {
        let dir = Path::new("/tmp");
        let a = scratch_output_path(dir);
        let b = scratch_output_path(dir);
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(a.parent(), Some(dir));
    }

    #[test]
    fn test_detection_log_path() {
        assert_eq!(
            detection_log_path(Path::new("/videos/VID_1.mp4")),
            PathBuf::from("/videos/VID_1.detections.json")
        );
    }

    #[test]
    fn test_directory_sink_moves_file_and_writes_log() {
        let scratch = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let file = scratch.path().join("take.mp4");
        std::fs::write(&file, b"mp4 data").unwrap();

        let sink = DirectorySink::new(target.path().join("Trackcam"));
        let stored = sink.store(&file, &log()).unwrap();

        assert!(!file.exists());
        assert_eq!(std::fs::read(&stored).unwrap(), b"mp4 data");
        assert!(
            stored
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("VID_"))
        );
        assert_eq!(StoredDetectionLog::load(&detection_log_path(&stored)).unwrap(), log());
    }

    #[test]
    fn test_second_store_gets_new_name() {
        let scratch = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(target.path());

        let first = scratch.path().join("a.mp4");
        let second = scratch.path().join("b.mp4");
        std::fs::write(&first, b"a").unwrap();
        std::fs::write(&second, b"b").unwrap();

        let a = sink.store(&first, &log()).unwrap();
        let b = sink.store(&second, &log()).unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read(&b).unwrap(), b"b");
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            StoredDetectionLog::load(&path),
            Err(StorageError::Serialize(_))
        ));
    }
}
