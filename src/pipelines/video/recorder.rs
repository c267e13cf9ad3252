// SPDX-License-Identifier: MPL-2.0

//! Capture session control
//!
//! [`CapturePipeline`] sits between a camera source and the writer:
//!
//! ```text
//! CameraSource ──▶ handle_sample ──┬──▶ MediaMuxer (remapped pts)
//!                                  └──▶ DetectionGate ──▶ DetectionWorker
//!                                                              │
//!                       DetectionLog ◀─────────────────────────┘
//! ```
//!
//! States run `idle -> armed -> recording -> stopping -> idle`. The writer is
//! opened when a session is armed so configuration errors reach the caller;
//! the countdown and the automatic stop run as tokio tasks that an explicit
//! [`CapturePipeline::stop`] cancels.

use super::muxer::{AudioTrackConfig, EncoderFactory, MediaMuxer, VideoTrackConfig};
use crate::backends::camera::SampleSink;
use crate::backends::camera::types::{
    AudioChunk, CaptureOrientation, Framerate, MediaTime, PixelFormat, Rational, Sample,
    VideoFrame,
};
use crate::constants::{recording, timing};
use crate::errors::{RecordingError, StorageError};
use crate::frame_processor::{
    DetectionAdapter, DetectionGate, DetectionJob, DetectionResult, DetectionWorker, Point,
};
use crate::media::encoders::CodecPreference;
use crate::storage::{PersistenceSink, StoredDetectionLog, scratch_output_path};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    /// Writer open, countdown running
    Armed,
    Recording,
    /// Waiting for the writer to close the file
    Stopping,
}

/// Published on the pipeline's broadcast channel
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// Countdown elapsed; samples are being written to this scratch file
    Started(PathBuf),
    /// Recording stored at its final location
    Finished(PathBuf),
    Failed(String),
}

/// Timestamp remapping for one slow-motion session
///
/// Created from the first recorded video frame and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowMotionContext {
    pub enabled: bool,
    pub factor: Rational,
    pub session_start: MediaTime,
}

impl SlowMotionContext {
    pub fn new(enabled: bool, factor: Rational, session_start: MediaTime) -> Self {
        Self {
            enabled,
            factor,
            session_start,
        }
    }

    /// `session_start + (pts - session_start) * factor`, or `pts` unchanged
    /// when slow motion is off
    pub fn remap(&self, pts: MediaTime) -> MediaTime {
        if !self.enabled {
            return pts;
        }
        self.session_start + (pts - self.session_start).scaled(self.factor)
    }
}

/// Recording parameters captured when a session is armed
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture rate in normal mode
    pub framerate: Framerate,
    /// Capture rate while slow motion is enabled
    pub slow_motion_framerate: Framerate,
    pub slow_motion_factor: Rational,
    pub codec: CodecPreference,
    pub bitrate_kbps: u32,
    pub audio: bool,
    pub orientation: CaptureOrientation,
    /// Where in-progress recordings are written
    pub scratch_dir: PathBuf,
}

impl SessionSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::BGRA,
            framerate: Framerate::from_int(recording::DEFAULT_FPS),
            slow_motion_framerate: Framerate::from_int(recording::SLOW_MOTION_FPS),
            slow_motion_factor: Rational {
                num: recording::SLOW_MOTION_FACTOR,
                denom: 1,
            },
            codec: CodecPreference::Auto,
            bitrate_kbps: recording::VIDEO_BITRATE_KBPS,
            audio: true,
            orientation: CaptureOrientation::default(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Video track for a session; in slow motion the container claims the
    /// capture rate divided by the factor
    pub fn video_track(&self, slow_motion: bool) -> VideoTrackConfig {
        let framerate = if slow_motion {
            self.slow_motion_framerate.divided_by(self.slow_motion_factor)
        } else {
            self.framerate
        };
        VideoTrackConfig {
            codec: self.codec,
            width: self.width,
            height: self.height,
            format: self.format,
            bitrate_kbps: self.bitrate_kbps,
            framerate,
            orientation: self.orientation,
        }
    }

    pub fn audio_track(&self, slow_motion: bool) -> Option<AudioTrackConfig> {
        self.audio.then(|| {
            AudioTrackConfig::aac_mono(if slow_motion {
                recording::SLOW_MOTION_AUDIO_SAMPLE_RATE
            } else {
                recording::AUDIO_SAMPLE_RATE
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SlotState {
    /// Gate was busy (or the queue refused the job)
    Dropped,
    /// Handed to the worker, no result yet
    Pending,
    Detected(Vec<Point>),
}

#[derive(Debug, Clone)]
struct Slot {
    timestamp: MediaTime,
    state: SlotState,
}

/// Per-frame detection outcomes of one session
///
/// Holds one slot per recorded video frame, keyed by the original capture
/// timestamp. Frames without a usable detection resolve to the last-known
/// centers, starting from a single center at the origin.
#[derive(Debug)]
pub struct DetectionLog {
    session: u64,
    slots: Vec<Slot>,
    seed: Vec<Point>,
}

impl Default for DetectionLog {
    fn default() -> Self {
        Self {
            session: 0,
            slots: Vec::new(),
            seed: vec![Point::ORIGIN],
        }
    }
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all slots and the last-known seed for a new session
    pub fn reset(&mut self, session: u64) {
        self.session = session;
        self.slots.clear();
        self.seed = vec![Point::ORIGIN];
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Jobs still waiting on the worker
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Pending)
            .count()
    }

    fn push(&mut self, timestamp: MediaTime, state: SlotState) -> Option<usize> {
        if self
            .slots
            .last()
            .is_some_and(|last| timestamp <= last.timestamp)
        {
            return None;
        }
        self.slots.push(Slot { timestamp, state });
        Some(self.slots.len() - 1)
    }

    /// Slot for a frame handed to the detector
    pub fn push_pending(&mut self, timestamp: MediaTime) -> Option<usize> {
        self.push(timestamp, SlotState::Pending)
    }

    /// Slot for a frame that skipped detection
    pub fn push_dropped(&mut self, timestamp: MediaTime) -> Option<usize> {
        self.push(timestamp, SlotState::Dropped)
    }

    pub fn mark_dropped(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.state = SlotState::Dropped;
        }
    }

    /// Record a detector result; results from another session are ignored
    pub fn complete(&mut self, session: u64, slot: usize, centers: Vec<Point>) -> bool {
        if session != self.session {
            return false;
        }
        match self.slots.get_mut(slot) {
            Some(s) if s.state == SlotState::Pending => {
                s.state = SlotState::Detected(centers);
                true
            }
            _ => false,
        }
    }

    /// One result per slot, in timestamp order
    ///
    /// Slots that were dropped, still pending, or detected nothing carry the
    /// most recent non-empty centers.
    pub fn resolve(&self) -> Vec<DetectionResult> {
        let mut last_known = self.seed.clone();
        self.slots
            .iter()
            .map(|slot| {
                if let SlotState::Detected(centers) = &slot.state
                    && !centers.is_empty()
                {
                    last_known = centers.clone();
                }
                DetectionResult::new(slot.timestamp, last_known.clone())
            })
            .collect()
    }
}

struct Session {
    id: u64,
    muxer: MediaMuxer,
    slow_motion: bool,
    factor: Rational,
    /// Latched by the first recorded video frame
    context: Option<SlowMotionContext>,
    last_raw_pts: Option<MediaTime>,
    last_appended_pts: Option<MediaTime>,
    width: u32,
    height: u32,
    frames_seen: u64,
    frames_rejected: u64,
}

struct Control {
    state: RecorderState,
    session: Option<Session>,
    cancel: Option<oneshot::Sender<()>>,
}

struct Inner {
    factory: Arc<dyn EncoderFactory>,
    persistence: Arc<dyn PersistenceSink>,
    settings: Mutex<SessionSettings>,
    control: Mutex<Control>,
    log: Arc<Mutex<DetectionLog>>,
    gate: DetectionGate,
    worker: Option<DetectionWorker>,
    detection_enabled: AtomicBool,
    slow_motion: AtomicBool,
    next_session: AtomicU64,
    events: broadcast::Sender<RecordingEvent>,
}

/// Real-time recording orchestrator
///
/// Cheap to clone; clones share one pipeline. Samples are expected from a
/// single delivery context (see [`SampleSink`]).
#[derive(Clone)]
pub struct CapturePipeline {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CapturePipeline {
    /// Create an idle pipeline
    ///
    /// Without a detector, or if the worker thread cannot be started, the
    /// pipeline records without detection.
    pub fn new(
        settings: SessionSettings,
        factory: Arc<dyn EncoderFactory>,
        persistence: Arc<dyn PersistenceSink>,
        detector: Option<DetectionAdapter>,
    ) -> Self {
        let log = Arc::new(Mutex::new(DetectionLog::new()));

        let worker = detector.and_then(|adapter| {
            let log = Arc::clone(&log);
            DetectionWorker::spawn(adapter, move |outcome| {
                let mut log = lock(&log);
                if !log.complete(outcome.session, outcome.slot, outcome.centers) {
                    debug!(
                        session = outcome.session,
                        slot = outcome.slot,
                        "Stale detection result ignored"
                    );
                }
            })
            .map_err(|e| warn!(error = %e, "Failed to start detection worker, detection disabled"))
            .ok()
        });

        let (events, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                factory,
                persistence,
                settings: Mutex::new(settings),
                control: Mutex::new(Control {
                    state: RecorderState::Idle,
                    session: None,
                    cancel: None,
                }),
                log,
                gate: DetectionGate::new(),
                detection_enabled: AtomicBool::new(worker.is_some()),
                worker,
                slow_motion: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
                events,
            }),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.inner.control)
    }

    pub fn state(&self) -> RecorderState {
        self.control().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn detection_enabled(&self) -> bool {
        self.inner.detection_enabled.load(Ordering::Relaxed)
    }

    /// Toggle detection; has no effect when no detector is available
    pub fn set_detection_enabled(&self, enabled: bool) {
        if enabled && self.inner.worker.is_none() {
            warn!("No detector available, detection stays disabled");
            return;
        }
        self.inner
            .detection_enabled
            .store(enabled, Ordering::Relaxed);
    }

    pub fn slow_motion(&self) -> bool {
        self.inner.slow_motion.load(Ordering::Relaxed)
    }

    /// Enable slow motion for sessions started from now on
    pub fn set_slow_motion(&self, enabled: bool) {
        self.inner.slow_motion.store(enabled, Ordering::Relaxed);
        if self.state() != RecorderState::Idle {
            debug!(enabled, "Slow motion change applies to the next session");
        }
    }

    pub fn settings(&self) -> SessionSettings {
        lock(&self.inner.settings).clone()
    }

    /// Replace the recording parameters; only while idle
    pub fn set_settings(&self, settings: SessionSettings) -> Result<(), RecordingError> {
        if self.state() != RecorderState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }
        *lock(&self.inner.settings) = settings;
        Ok(())
    }

    pub fn gate(&self) -> &DetectionGate {
        &self.inner.gate
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: RecordingEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Arm a recording session
    ///
    /// Opens and starts the writer immediately, so writer and encoder errors
    /// are returned here. Recording begins after `delay` and stops by itself
    /// after a further `duration` when one is given. Must be called from
    /// within a tokio runtime.
    ///
    /// Returns the scratch path the session writes to.
    pub fn start_with_delay(
        &self,
        delay: Duration,
        duration: Option<Duration>,
    ) -> Result<PathBuf, RecordingError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RecordingError::NoRuntime)?;

        let mut control = self.control();
        if control.state != RecorderState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }

        let settings = self.settings();
        let slow_motion = self.slow_motion();
        let output = scratch_output_path(&settings.scratch_dir);

        let mut muxer = MediaMuxer::open(
            &output,
            settings.video_track(slow_motion),
            settings.audio_track(slow_motion),
            slow_motion,
            self.inner.factory.as_ref(),
        )?;
        muxer.start()?;

        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.log).reset(id);

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        control.session = Some(Session {
            id,
            muxer,
            slow_motion,
            factor: settings.slow_motion_factor,
            context: None,
            last_raw_pts: None,
            last_appended_pts: None,
            width: settings.width,
            height: settings.height,
            frames_seen: 0,
            frames_rejected: 0,
        });
        control.cancel = Some(cancel_tx);
        control.state = RecorderState::Armed;
        drop(control);

        info!(
            session = id,
            path = %output.display(),
            delay_ms = delay.as_millis() as u64,
            duration_ms = duration.map(|d| d.as_millis() as u64),
            slow_motion,
            detection = self.detection_enabled(),
            "Recording armed"
        );

        if delay.is_zero() {
            self.begin_recording(id);
        }

        let pipeline = self.clone();
        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                pipeline.begin_recording(id);
            }

            let Some(duration) = duration else {
                return;
            };
            tokio::select! {
                _ = &mut cancel_rx => {}
                _ = tokio::time::sleep(duration) => {
                    info!(session = id, "Recording duration elapsed");
                    if let Err(e) = pipeline.stop_session(Some(id)).await {
                        warn!(session = id, error = %e, "Automatic stop failed");
                    }
                }
            }
        });

        Ok(output)
    }

    fn begin_recording(&self, id: u64) {
        let mut control = self.control();
        if control.state != RecorderState::Armed {
            return;
        }
        let Some(session) = control.session.as_ref().filter(|s| s.id == id) else {
            return;
        };
        let path = session.muxer.output_path().to_path_buf();
        control.state = RecorderState::Recording;
        drop(control);

        info!(session = id, "Recording started");
        self.publish(RecordingEvent::Started(path));
    }

    /// Route one captured sample
    ///
    /// Called from the capture delivery context. Samples outside the
    /// `recording` state are ignored.
    pub fn handle_sample(&self, sample: Sample) {
        match sample {
            Sample::Video(frame) => self.handle_video(frame),
            Sample::Audio(chunk) => self.handle_audio(&chunk),
        }
    }

    fn handle_video(&self, frame: VideoFrame) {
        let mut control = self.control();
        if control.state != RecorderState::Recording {
            return;
        }
        let Some(session) = control.session.as_mut() else {
            return;
        };

        let pts = frame.pts;
        if session.last_raw_pts.is_some_and(|last| pts <= last) {
            trace!(pts = %pts, "Non-advancing video timestamp dropped");
            return;
        }
        session.last_raw_pts = Some(pts);

        let (slow_motion, factor) = (session.slow_motion, session.factor);
        let context = *session
            .context
            .get_or_insert_with(|| SlowMotionContext::new(slow_motion, factor, pts));
        let remapped = context.remap(pts);

        if session.muxer.append_video(&frame, remapped) {
            session.last_appended_pts = Some(remapped);
        } else {
            session.frames_rejected += 1;
            trace!(pts = %pts, "Writer did not accept video frame");
        }
        session.frames_seen += 1;

        if context.enabled && session.frames_seen % recording::SLOW_MOTION_LOG_INTERVAL == 0 {
            debug!(
                frames = session.frames_seen,
                raw = %pts,
                remapped = %remapped,
                "Slow motion remap"
            );
        } else if session.frames_seen % timing::FRAME_LOG_INTERVAL == 0 {
            trace!(
                frames = session.frames_seen,
                rejected = session.frames_rejected,
                pts = %pts,
                "Recording progress"
            );
        }

        // Still under the control lock so stop() never sees a slot for a
        // frame it did not record
        let id = session.id;
        self.offer_for_detection(id, frame);
    }

    fn offer_for_detection(&self, session: u64, frame: VideoFrame) {
        if !self.detection_enabled() {
            return;
        }
        let Some(worker) = self.inner.worker.as_ref() else {
            return;
        };

        let mut log = lock(&self.inner.log);
        let Some(permit) = self.inner.gate.try_acquire() else {
            log.push_dropped(frame.pts);
            trace!(pts = %frame.pts, "Detector busy, frame skipped");
            return;
        };
        let Some(slot) = log.push_pending(frame.pts) else {
            return;
        };

        let job = DetectionJob {
            session,
            slot,
            frame,
            permit,
        };
        if let Err(e) = worker.try_submit(job) {
            log.mark_dropped(slot);
            debug!(error = %e, "Detection job not queued");
        }
    }

    fn handle_audio(&self, chunk: &AudioChunk) {
        let mut control = self.control();
        if control.state != RecorderState::Recording {
            return;
        }
        let Some(session) = control.session.as_mut() else {
            return;
        };
        if session.slow_motion {
            return;
        }
        session.muxer.append_audio(chunk);
    }

    /// Stop the current session
    ///
    /// A pending countdown is cancelled without producing a file. While
    /// recording, the writer is capped at the last appended video timestamp
    /// and closed, and the file is handed to the persistence sink together
    /// with the detection log. Returns the stored path, or `None` when there
    /// was nothing to stop.
    pub async fn stop(&self) -> Result<Option<PathBuf>, RecordingError> {
        self.stop_session(None).await
    }

    async fn stop_session(&self, expected: Option<u64>) -> Result<Option<PathBuf>, RecordingError> {
        let (session, finish) = {
            let mut control = self.control();
            if let Some(id) = expected
                && control.session.as_ref().is_none_or(|s| s.id != id)
            {
                return Ok(None);
            }
            if let Some(cancel) = control.cancel.take() {
                let _ = cancel.send(());
            }

            match control.state {
                RecorderState::Idle | RecorderState::Stopping => return Ok(None),
                RecorderState::Armed => {
                    control.state = RecorderState::Idle;
                    // Dropping the unstarted session aborts the writer
                    control.session.take();
                    info!("Countdown cancelled");
                    return Ok(None);
                }
                RecorderState::Recording => {}
            }

            let Some(mut session) = control.session.take() else {
                control.state = RecorderState::Idle;
                return Ok(None);
            };
            control.state = RecorderState::Stopping;

            session.muxer.mark_video_finished();
            session.muxer.mark_audio_finished();
            let cap = session.last_appended_pts.unwrap_or(MediaTime::ZERO);
            info!(
                session = session.id,
                frames = session.frames_seen,
                written = session.muxer.video_frames(),
                last_pts = %cap,
                "Stopping recording"
            );
            let finish = session.muxer.finish(cap);
            (session, finish)
        };

        let result = finish.await;

        let log = {
            let log = lock(&self.inner.log);
            if log.pending() > 0 {
                debug!(pending = log.pending(), "Detections still in flight at stop");
            }
            StoredDetectionLog::new(session.width, session.height, log.resolve())
        };

        let outcome = match result {
            Ok(path) => {
                let persistence = Arc::clone(&self.inner.persistence);
                match tokio::task::spawn_blocking(move || persistence.store(&path, &log)).await {
                    Ok(Ok(stored)) => Ok(stored),
                    Ok(Err(e)) => Err(RecordingError::Storage(e)),
                    Err(e) => Err(RecordingError::Storage(StorageError::Io(format!(
                        "Persistence task failed: {}",
                        e
                    )))),
                }
            }
            Err(e) => Err(RecordingError::Writer(e)),
        };

        self.control().state = RecorderState::Idle;

        match outcome {
            Ok(path) => {
                info!(session = session.id, path = %path.display(), "Recording finished");
                self.publish(RecordingEvent::Finished(path.clone()));
                Ok(Some(path))
            }
            Err(e) => {
                error!(session = session.id, error = %e, "Recording failed");
                self.publish(RecordingEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

impl SampleSink for CapturePipeline {
    fn deliver(&self, sample: Sample) {
        self.handle_sample(sample);
    }
}
