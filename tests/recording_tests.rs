// SPDX-License-Identifier: MPL-2.0

//! Integration tests for capture sessions
//!
//! These drive a [`CapturePipeline`] with synthetic samples, an in-memory
//! encoder and a scripted detector, so no camera or GStreamer install is
//! needed.

use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trackcam::backends::camera::types::{
    AudioChunk, Framerate, MediaTime, PixelFormat, Rational, Sample, VideoFrame,
};
use trackcam::errors::{DetectionError, RecordingError, StorageError, WriterError};
use trackcam::frame_processor::{Detection, DetectionAdapter, FrameRegion, ObjectDetector};
use trackcam::pipelines::video::{
    AudioTrackConfig, CapturePipeline, EncoderBackend, EncoderFactory, RecorderState,
    RecordingEvent, SessionSettings, VideoTrackConfig,
};
use trackcam::storage::{PersistenceSink, StoredDetectionLog};

#[derive(Debug, Default)]
struct Written {
    framerate: Option<Framerate>,
    audio_track: bool,
    video: Vec<MediaTime>,
    audio_chunks: usize,
}

/// Encoder that remembers what it was given and writes a placeholder file
#[derive(Clone, Default)]
struct MemoryEncoder {
    written: Arc<Mutex<Written>>,
}

struct MemoryBackend {
    written: Arc<Mutex<Written>>,
    output: PathBuf,
}

impl EncoderFactory for MemoryEncoder {
    fn create(
        &self,
        output: &Path,
        video: &VideoTrackConfig,
        audio: Option<&AudioTrackConfig>,
    ) -> Result<Box<dyn EncoderBackend>, WriterError> {
        let mut written = self.written.lock().unwrap();
        *written = Written {
            framerate: Some(video.framerate),
            audio_track: audio.is_some(),
            ..Written::default()
        };
        Ok(Box::new(MemoryBackend {
            written: Arc::clone(&self.written),
            output: output.to_path_buf(),
        }))
    }
}

impl EncoderBackend for MemoryBackend {
    fn start(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    fn is_video_ready(&self) -> bool {
        true
    }

    fn is_audio_ready(&self) -> bool {
        true
    }

    fn push_video(
        &mut self,
        _: &VideoFrame,
        pts: MediaTime,
        _: MediaTime,
    ) -> Result<(), WriterError> {
        self.written.lock().unwrap().video.push(pts);
        Ok(())
    }

    fn push_audio(&mut self, _: &AudioChunk, _: MediaTime) -> Result<(), WriterError> {
        self.written.lock().unwrap().audio_chunks += 1;
        Ok(())
    }

    fn end_video(&mut self) {}

    fn end_audio(&mut self) {}

    fn take_fault(&mut self) -> Option<WriterError> {
        None
    }

    fn finalize(self: Box<Self>, _: Option<MediaTime>) -> Result<(), WriterError> {
        std::fs::write(&self.output, b"mp4")
            .map_err(|e| WriterError::FinishFailed(e.to_string()))
    }

    fn abort(self: Box<Self>) {
        let _ = std::fs::remove_file(&self.output);
    }
}

/// Keeps stored logs in memory and leaves the file where it is
#[derive(Clone, Default)]
struct MemorySink {
    logs: Arc<Mutex<Vec<StoredDetectionLog>>>,
}

impl PersistenceSink for MemorySink {
    fn store(&self, file: &Path, log: &StoredDetectionLog) -> Result<PathBuf, StorageError> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(file.to_path_buf())
    }
}

/// One subject moving right by a fixed step per inference
struct LinearSubject {
    calls: usize,
}

impl ObjectDetector for LinearSubject {
    fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
        let x = 0.1 + self.calls as f32 * 0.005;
        self.calls += 1;
        Ok(vec![Detection::new(
            "person",
            0.9,
            FrameRegion::new(x, 0.4, 0.1, 0.2),
        )])
    }
}

/// Subject detector that only answers once the test lets it
struct SteppedSubject {
    calls: Arc<AtomicUsize>,
    release: mpsc::Receiver<()>,
}

impl ObjectDetector for SteppedSubject {
    fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.release
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| DetectionError::InferenceFailed(e.to_string()))?;
        let x = 0.2 + call as f32 * 0.4;
        Ok(vec![Detection::new(
            "person",
            0.9,
            FrameRegion::new(x, 0.4, 0.1, 0.2),
        )])
    }
}

fn frame(pts: MediaTime) -> VideoFrame {
    VideoFrame::from_bytes(16, 16, PixelFormat::BGRA, vec![0; 16 * 16 * 4], pts)
}

fn settings(scratch: &Path) -> SessionSettings {
    SessionSettings {
        scratch_dir: scratch.to_path_buf(),
        ..SessionSettings::new(16, 16)
    }
}

fn wait_for_gate(pipeline: &CapturePipeline) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while pipeline.gate().is_busy() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[tokio::test]
async fn test_three_second_recording_with_detection() {
    let scratch = tempfile::tempdir().unwrap();
    let encoder = MemoryEncoder::default();
    let sink = MemorySink::default();
    let adapter = DetectionAdapter::new(Box::new(LinearSubject { calls: 0 }));
    let pipeline = CapturePipeline::new(
        settings(scratch.path()),
        Arc::new(encoder.clone()),
        Arc::new(sink.clone()),
        Some(adapter),
    );
    assert!(pipeline.detection_enabled());

    pipeline.start_with_delay(Duration::ZERO, None).unwrap();
    let fps = Framerate::from_int(30);
    // Capture clocks rarely start at zero
    let base = MediaTime::new(12, 1);
    for i in 0..90 {
        wait_for_gate(&pipeline);
        pipeline.handle_sample(Sample::Video(frame(base + MediaTime::from_frame_index(i, fps))));
    }
    wait_for_gate(&pipeline);

    let stored = pipeline.stop().await.unwrap().unwrap();
    assert!(stored.exists());
    assert_eq!(pipeline.state(), RecorderState::Idle);

    let written = encoder.written.lock().unwrap();
    assert_eq!(written.video.len(), 90);
    assert!(written.video.windows(2).all(|w| w[0] < w[1]));
    let last = *written.video.last().unwrap();
    assert_eq!(last + fps.frame_duration(), MediaTime::new(3, 1));

    let logs = sink.logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    let entries = &logs[0].entries;
    assert_eq!(entries.len(), 90);
    assert!(entries.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(entries[0].timestamp, base);

    let xs: Vec<f64> = entries
        .iter()
        .map(|e| e.primary_center().unwrap().x)
        .collect();
    assert!((xs[0] - 0.15).abs() < 1e-6);
    assert!(xs.windows(2).all(|w| w[1] > w[0]));
}

#[tokio::test]
async fn test_slow_motion_session() {
    let scratch = tempfile::tempdir().unwrap();
    let encoder = MemoryEncoder::default();
    let pipeline = CapturePipeline::new(
        settings(scratch.path()),
        Arc::new(encoder.clone()),
        Arc::new(MemorySink::default()),
        None,
    );
    pipeline.set_slow_motion(true);

    pipeline.start_with_delay(Duration::ZERO, None).unwrap();
    let capture = Framerate::from_int(120);
    let origin = MediaTime::new(1000, 120);
    for i in 0..120 {
        let pts = origin + MediaTime::from_frame_index(i, capture);
        pipeline.handle_sample(Sample::Video(frame(pts)));
        pipeline.handle_sample(Sample::Audio(AudioChunk {
            sample_rate: 22_050,
            channels: 1,
            data: vec![0u8; 368].into(),
            pts,
        }));
    }
    pipeline.stop().await.unwrap();

    let written = encoder.written.lock().unwrap();
    assert_eq!(written.framerate, Some(Framerate::from_int(30)));
    assert!(!written.audio_track);
    assert_eq!(written.audio_chunks, 0);

    // Each capture interval of 1/120 s plays back as 4/120 s
    let factor = Rational::from_int(4).unwrap();
    for (i, pts) in written.video.iter().enumerate() {
        let raw = MediaTime::from_frame_index(i as u64, capture);
        assert_eq!(*pts, raw.scaled(factor));
    }
    assert_eq!(written.video.len(), 120);
}

#[tokio::test]
async fn test_duration_stops_recording() {
    let scratch = tempfile::tempdir().unwrap();
    let sink = MemorySink::default();
    let pipeline = CapturePipeline::new(
        settings(scratch.path()),
        Arc::new(MemoryEncoder::default()),
        Arc::new(sink.clone()),
        None,
    );
    let mut events = pipeline.subscribe();

    pipeline
        .start_with_delay(Duration::from_millis(20), Some(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(pipeline.state(), RecorderState::Armed);
    assert!(matches!(
        pipeline.start_with_delay(Duration::ZERO, None),
        Err(RecordingError::AlreadyRecording)
    ));

    let started = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(started, RecordingEvent::Started(_)));
    for i in 0..3 {
        pipeline.handle_sample(Sample::Video(frame(MediaTime::new(i, 30))));
    }

    let finished = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(finished, RecordingEvent::Finished(_)));
    assert_eq!(pipeline.state(), RecorderState::Idle);
    assert_eq!(sink.logs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_without_frames_reports_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = CapturePipeline::new(
        settings(scratch.path()),
        Arc::new(MemoryEncoder::default()),
        Arc::new(MemorySink::default()),
        None,
    );
    let mut events = pipeline.subscribe();

    pipeline.start_with_delay(Duration::ZERO, None).unwrap();
    let result = pipeline.stop().await;
    assert!(matches!(result, Err(RecordingError::Writer(_))));
    assert!(matches!(
        events.recv().await.unwrap(),
        RecordingEvent::Started(_)
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        RecordingEvent::Failed(_)
    ));

    // The pipeline is usable again afterwards
    assert_eq!(pipeline.state(), RecorderState::Idle);
    pipeline.start_with_delay(Duration::ZERO, None).unwrap();
    pipeline.handle_sample(Sample::Video(frame(MediaTime::ZERO)));
    assert!(pipeline.stop().await.unwrap().is_some());
}

#[tokio::test]
async fn test_frames_skipped_while_detector_busy() {
    let scratch = tempfile::tempdir().unwrap();
    let sink = MemorySink::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate_rx) = mpsc::channel();
    let adapter = DetectionAdapter::new(Box::new(SteppedSubject {
        calls: Arc::clone(&calls),
        release: gate_rx,
    }));
    let pipeline = CapturePipeline::new(
        settings(scratch.path()),
        Arc::new(MemoryEncoder::default()),
        Arc::new(sink.clone()),
        Some(adapter),
    );

    pipeline.start_with_delay(Duration::ZERO, None).unwrap();
    let fps = Framerate::from_int(30);
    let push = |i: u64| {
        pipeline.handle_sample(Sample::Video(frame(MediaTime::from_frame_index(i, fps))));
    };

    // Frame 0 takes the gate, frames 1..5 arrive while it is held
    for i in 0..5 {
        push(i);
        assert!(pipeline.gate().is_busy());
    }
    release.send(()).unwrap();
    wait_for_gate(&pipeline);

    // Frame 5 is detected, 6 and 7 are skipped again
    for i in 5..8 {
        push(i);
    }
    release.send(()).unwrap();
    wait_for_gate(&pipeline);

    pipeline.stop().await.unwrap().unwrap();

    let submitted = calls.load(Ordering::SeqCst);
    assert_eq!(submitted, 2);
    assert!(submitted < 8);

    let logs = sink.logs.lock().unwrap();
    let entries = &logs[0].entries;
    assert_eq!(entries.len(), 8);
    let xs: Vec<f64> = entries
        .iter()
        .map(|e| e.primary_center().unwrap().x)
        .collect();
    for x in &xs[..5] {
        assert!((x - 0.25).abs() < 1e-6);
    }
    for x in &xs[5..] {
        assert!((x - 0.65).abs() < 1e-6);
    }
}
