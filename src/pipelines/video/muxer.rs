// SPDX-License-Identifier: MPL-2.0

//! Audio/video muxing session
//!
//! [`MediaMuxer`] owns one writer session: two tracks feeding a single
//! container through an [`EncoderBackend`]. Its lifecycle is
//! `idle -> writing -> finishing -> {finished, failed}`.
//!
//! - The first appended video sample latches the session origin; everything
//!   handed to the backend is relative to it.
//! - Audio older than the origin is dropped. Audio newer than the newest video
//!   sample is held back so the duration cap applied by [`MediaMuxer::finish`]
//!   can still discard it.
//! - Encoder resources are released exactly once, by `finish` or on drop.

use crate::backends::camera::types::{
    AudioChunk, CaptureOrientation, Framerate, MediaTime, PixelFormat, VideoFrame,
};
use crate::constants::recording;
use crate::errors::WriterError;
use crate::media::encoders::{AudioCodec, CodecPreference};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Audio chunks held back waiting for video before the oldest is forced out
const MAX_PENDING_AUDIO: usize = 64;

/// Video track parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackConfig {
    pub codec: CodecPreference,
    pub width: u32,
    pub height: u32,
    /// Layout of the frames that will be appended
    pub format: PixelFormat,
    pub bitrate_kbps: u32,
    /// Frame rate written to the container
    ///
    /// In slow motion this is the capture rate divided by the factor, which is
    /// how the file claims its stretched duration.
    pub framerate: Framerate,
    /// Display orientation written into the container
    pub orientation: CaptureOrientation,
}

/// Audio track parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_bps: i32,
}

impl AudioTrackConfig {
    /// Mono AAC at the default bitrate
    pub fn aac_mono(sample_rate: u32) -> Self {
        Self {
            codec: AudioCodec::AAC,
            sample_rate,
            channels: recording::AUDIO_CHANNELS,
            bitrate_bps: recording::AUDIO_BITRATE_BPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Opened, encoder not started
    Idle,
    /// Accepting samples
    Writing,
    /// Both tracks marked finished; container not closed yet
    Finishing,
    Finished,
    Failed,
}

impl WriterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WriterState::Finished | WriterState::Failed)
    }

    fn name(&self) -> &'static str {
        match self {
            WriterState::Idle => "idle",
            WriterState::Writing => "writing",
            WriterState::Finishing => "finishing",
            WriterState::Finished => "finished",
            WriterState::Failed => "failed",
        }
    }
}

/// Encoder/container implementation behind a writer session
///
/// Timestamps passed in are relative to the session origin. Calls for one
/// track are never concurrent.
pub trait EncoderBackend: Send {
    fn start(&mut self) -> Result<(), WriterError>;

    /// Whether the video input can take another frame right now
    fn is_video_ready(&self) -> bool;

    fn is_audio_ready(&self) -> bool;

    fn push_video(
        &mut self,
        frame: &VideoFrame,
        pts: MediaTime,
        duration: MediaTime,
    ) -> Result<(), WriterError>;

    fn push_audio(&mut self, chunk: &AudioChunk, pts: MediaTime) -> Result<(), WriterError>;

    /// No more video will be pushed
    fn end_video(&mut self);

    /// No more audio will be pushed
    fn end_audio(&mut self);

    /// A fault the encoder reported asynchronously, if any
    fn take_fault(&mut self) -> Option<WriterError>;

    /// Drain, close the container and release all resources
    ///
    /// Blocking. `end` is the capped session duration when one was requested.
    fn finalize(self: Box<Self>, end: Option<MediaTime>) -> Result<(), WriterError>;

    /// Release resources without producing a file
    fn abort(self: Box<Self>);
}

/// Creates the backend for a new session
pub trait EncoderFactory: Send + Sync {
    /// `audio` is `None` when the session carries no audio track
    fn create(
        &self,
        output: &Path,
        video: &VideoTrackConfig,
        audio: Option<&AudioTrackConfig>,
    ) -> Result<Box<dyn EncoderBackend>, WriterError>;
}

/// Completion of [`MediaMuxer::finish`]
///
/// Resolves exactly once, to the output path or the reason the recording
/// failed.
#[derive(Debug)]
pub struct FinishHandle {
    receiver: oneshot::Receiver<Result<PathBuf, WriterError>>,
}

impl FinishHandle {
    fn resolved(result: Result<PathBuf, WriterError>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Block the current (non-async) thread until the session is closed
    pub fn wait_blocking(self) -> Result<PathBuf, WriterError> {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(WriterError::FinishFailed("writer thread exited".into())))
    }
}

impl Future for FinishHandle {
    type Output = Result<PathBuf, WriterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(WriterError::FinishFailed("writer thread exited".into())))
        })
    }
}

/// One writer session
pub struct MediaMuxer {
    output: PathBuf,
    video: VideoTrackConfig,
    audio: Option<AudioTrackConfig>,
    /// Audio samples are discarded rather than written
    drop_audio: bool,
    backend: Option<Box<dyn EncoderBackend>>,
    state: Arc<Mutex<WriterState>>,
    origin: Option<MediaTime>,
    last_video_pts: Option<MediaTime>,
    pending_audio: VecDeque<AudioChunk>,
    video_finished: bool,
    audio_finished: bool,
    fault: Option<WriterError>,
    video_frames: u64,
    audio_chunks: u64,
}

impl MediaMuxer {
    /// Configure both tracks for `output`
    ///
    /// With `slow_motion` set the audio track is configured but every audio
    /// sample is dropped; no stretched audio is produced.
    pub fn open(
        output: impl Into<PathBuf>,
        video: VideoTrackConfig,
        audio: Option<AudioTrackConfig>,
        slow_motion: bool,
        factory: &dyn EncoderFactory,
    ) -> Result<Self, WriterError> {
        let output = output.into();

        if output.exists() {
            return Err(WriterError::OpenFailed(format!(
                "{} already exists",
                output.display()
            )));
        }
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(WriterError::OpenFailed(format!(
                "{} is not a directory",
                parent.display()
            )));
        }

        let drop_audio = slow_motion && audio.is_some();
        let backend_audio = if slow_motion { None } else { audio.as_ref() };
        let backend = factory.create(&output, &video, backend_audio)?;

        info!(
            path = %output.display(),
            width = video.width,
            height = video.height,
            framerate = %video.framerate,
            bitrate_kbps = video.bitrate_kbps,
            audio_rate = audio.as_ref().map(|a| a.sample_rate),
            slow_motion,
            "Writer session opened"
        );

        Ok(Self {
            output,
            video,
            audio,
            drop_audio,
            backend: Some(backend),
            state: Arc::new(Mutex::new(WriterState::Idle)),
            origin: None,
            last_video_pts: None,
            pending_audio: VecDeque::new(),
            video_finished: false,
            audio_finished: false,
            fault: None,
            video_frames: 0,
            audio_chunks: 0,
        })
    }

    /// Start the encoder and begin accepting samples
    pub fn start(&mut self) -> Result<(), WriterError> {
        let state = self.state();
        if state != WriterState::Idle {
            return Err(WriterError::InvalidState(state.name()));
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(WriterError::InvalidState("closed"));
        };

        if let Err(e) = backend.start() {
            error!(error = %e, "Writer failed to start");
            if let Some(backend) = self.backend.take() {
                backend.abort();
            }
            self.set_state(WriterState::Failed);
            return Err(e);
        }

        self.set_state(WriterState::Writing);
        debug!("Writer session started");
        Ok(())
    }

    pub fn state(&self) -> WriterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: WriterState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn video_config(&self) -> &VideoTrackConfig {
        &self.video
    }

    pub fn audio_config(&self) -> Option<&AudioTrackConfig> {
        self.audio.as_ref()
    }

    /// Session origin, latched by the first appended video sample
    pub fn origin(&self) -> Option<MediaTime> {
        self.origin
    }

    pub fn last_video_pts(&self) -> Option<MediaTime> {
        self.last_video_pts
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    pub fn audio_chunks(&self) -> u64 {
        self.audio_chunks
    }

    /// Record a fault; later appends fail and `finish` reports it
    fn fault(&mut self, err: WriterError) {
        if self.fault.is_none() {
            error!(error = %err, "Writer faulted");
            self.fault = Some(err);
        }
    }

    fn check_fault(&mut self) -> bool {
        if let Some(err) = self.backend.as_mut().and_then(|b| b.take_fault()) {
            self.fault(err);
        }
        self.fault.is_some()
    }

    /// Append a video frame at (possibly remapped) time `pts`
    ///
    /// Returns `false` when the session is not writing, the track is finished
    /// or busy, or the writer has faulted. `pts` must not go backwards; that
    /// is the caller's responsibility.
    pub fn append_video(&mut self, frame: &VideoFrame, pts: MediaTime) -> bool {
        if self.state() != WriterState::Writing || self.video_finished || self.check_fault() {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        if !backend.is_video_ready() {
            trace!(pts = %pts, "Video input busy, frame not appended");
            return false;
        }

        let origin = *self.origin.get_or_insert_with(|| {
            info!(origin = %pts, "Session origin latched");
            pts
        });

        let duration = self.video.framerate.frame_duration();
        if let Err(e) = backend.push_video(frame, pts - origin, duration) {
            self.fault(e);
            return false;
        }

        self.last_video_pts = Some(pts);
        self.video_frames += 1;
        self.flush_pending_audio(Some(pts));
        true
    }

    /// Append an audio chunk
    ///
    /// Chunks that predate the session origin are dropped, as is all audio
    /// in a slow-motion session.
    pub fn append_audio(&mut self, chunk: &AudioChunk) -> bool {
        if self.state() != WriterState::Writing
            || self.audio_finished
            || self.audio.is_none()
            || self.check_fault()
        {
            return false;
        }
        if self.drop_audio {
            trace!(pts = %chunk.pts, "Slow motion: audio dropped");
            return false;
        }
        let Some(origin) = self.origin else {
            trace!(pts = %chunk.pts, "Audio before session start dropped");
            return false;
        };
        if chunk.pts < origin {
            return false;
        }
        if !self.backend.as_ref().is_some_and(|b| b.is_audio_ready()) {
            return false;
        }

        self.pending_audio.push_back(chunk.clone());
        if self.pending_audio.len() > MAX_PENDING_AUDIO {
            // Video has stalled; keep audio flowing rather than buffering forever
            if let Some(oldest) = self.pending_audio.pop_front() {
                self.push_audio(&oldest);
            }
        }
        self.flush_pending_audio(self.last_video_pts);
        true
    }

    /// Push held-back audio that starts at or before `limit`
    fn flush_pending_audio(&mut self, limit: Option<MediaTime>) {
        let Some(limit) = limit else {
            return;
        };
        while self.pending_audio.front().is_some_and(|c| c.pts <= limit) {
            if let Some(chunk) = self.pending_audio.pop_front() {
                self.push_audio(&chunk);
            }
        }
    }

    fn push_audio(&mut self, chunk: &AudioChunk) {
        let (Some(origin), Some(backend)) = (self.origin, self.backend.as_mut()) else {
            return;
        };
        match backend.push_audio(chunk, chunk.pts - origin) {
            Ok(()) => self.audio_chunks += 1,
            Err(e) => self.fault(e),
        }
    }

    /// Stop accepting video
    pub fn mark_video_finished(&mut self) {
        self.video_finished = true;
        self.enter_finishing_if_done();
    }

    /// Stop accepting audio
    pub fn mark_audio_finished(&mut self) {
        self.audio_finished = true;
        self.enter_finishing_if_done();
    }

    fn enter_finishing_if_done(&mut self) {
        if self.video_finished && self.audio_finished && self.state() == WriterState::Writing {
            self.set_state(WriterState::Finishing);
            debug!("Both tracks finished");
        }
    }

    /// Close the session
    ///
    /// Marks both tracks finished, caps the session at `last_video_pts`
    /// unless it is zero, and flushes and closes the container on a
    /// background thread. Appends after this call always return `false`.
    pub fn finish(&mut self, last_video_pts: MediaTime) -> FinishHandle {
        let state = self.state();
        if !matches!(state, WriterState::Writing | WriterState::Finishing) {
            return FinishHandle::resolved(Err(WriterError::InvalidState(state.name())));
        }

        self.mark_video_finished();
        self.mark_audio_finished();

        let Some(mut backend) = self.backend.take() else {
            return FinishHandle::resolved(Err(WriterError::InvalidState("closed")));
        };

        let Some(origin) = self.origin else {
            warn!("Finishing a session that never received video");
            backend.abort();
            self.set_state(WriterState::Failed);
            return FinishHandle::resolved(Err(WriterError::FinishFailed(
                "no video frames were written".into(),
            )));
        };

        let cap = (!last_video_pts.is_zero()).then_some(last_video_pts);
        self.drain_pending_audio(cap, backend.as_mut());

        if self.audio.is_some() && !self.drop_audio {
            backend.end_audio();
        }
        backend.end_video();

        if let Some(err) = backend.take_fault() {
            self.fault(err);
        }
        let fault = self.fault.clone();
        let relative_end = cap.map(|end| end - origin);
        let output = self.output.clone();
        let state = Arc::clone(&self.state);
        let video_frames = self.video_frames;
        let audio_chunks = self.audio_chunks;

        info!(
            video_frames,
            audio_chunks,
            end = ?relative_end.map(|t| t.as_secs_f64()),
            "Finishing writer session"
        );

        let (sender, receiver) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("writer-finish".into())
            .spawn(move || {
                let result = match (backend.finalize(relative_end), fault) {
                    (Ok(()), None) => Ok(output),
                    (Ok(()), Some(fault)) => Err(WriterError::Faulted(fault.to_string())),
                    (Err(e), _) => Err(e),
                };
                let final_state = if result.is_ok() {
                    WriterState::Finished
                } else {
                    WriterState::Failed
                };
                *state.lock().unwrap_or_else(|e| e.into_inner()) = final_state;
                match &result {
                    Ok(path) => info!(path = %path.display(), "Writer session finished"),
                    Err(e) => error!(error = %e, "Writer session failed"),
                }
                let _ = sender.send(result);
            });

        if let Err(e) = spawned {
            self.set_state(WriterState::Failed);
            return FinishHandle::resolved(Err(WriterError::FinishFailed(format!(
                "failed to spawn writer thread: {}",
                e
            ))));
        }

        FinishHandle { receiver }
    }

    /// Push pending audio up to `cap` (all of it without one), trimming the
    /// chunk that straddles the cap and discarding the rest
    fn drain_pending_audio(&mut self, cap: Option<MediaTime>, backend: &mut dyn EncoderBackend) {
        let Some(origin) = self.origin else {
            self.pending_audio.clear();
            return;
        };

        let mut discarded = 0usize;
        while let Some(chunk) = self.pending_audio.pop_front() {
            let chunk = match cap {
                Some(cap) if chunk.pts >= cap => {
                    discarded += 1;
                    continue;
                }
                Some(cap) if chunk.pts + chunk.duration() > cap => {
                    let span = cap - chunk.pts;
                    let frames = (span.value as i128 * chunk.sample_rate as i128
                        / span.timescale as i128) as usize;
                    chunk.truncated(frames)
                }
                _ => chunk,
            };
            match backend.push_audio(&chunk, chunk.pts - origin) {
                Ok(()) => self.audio_chunks += 1,
                Err(e) => self.fault(e),
            }
        }

        if discarded > 0 {
            debug!(discarded, "Audio past the session end discarded");
        }
    }
}

impl Drop for MediaMuxer {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            warn!(path = %self.output.display(), "Writer session dropped without finish");
            backend.abort();
            self.set_state(WriterState::Failed);
        }
    }
}
