// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder backend
//!
//! ```text
//! appsrc (raw video) ! queue ! videoconvert ! encoder ! parser ─┐
//!                                                                ├─ mp4mux ! filesink
//! appsrc (S16LE)     ! queue ! audioconvert ! audioresample ! aac ┘
//! ```
//!
//! Samples arrive already timed relative to the session origin, so both
//! appsrcs run in time format with no live timestamping.
//!
//! The newest video buffer is held back until the next one arrives. On
//! finalize its duration is cut at the session end point, so the video track
//! stops at the last appended timestamp instead of one frame later.

use super::encoder_selection::select_encoders;
use super::muxer::{AudioTrackConfig, EncoderBackend, EncoderFactory, VideoTrackConfig};
use crate::backends::camera::types::{AudioChunk, MediaTime, VideoFrame};
use crate::constants::{pipeline as pipeline_consts, timing};
use crate::errors::WriterError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Creates [`GstWriterBackend`]s using the best installed encoders
#[derive(Debug, Clone, Copy, Default)]
pub struct GstEncoderFactory;

impl EncoderFactory for GstEncoderFactory {
    fn create(
        &self,
        output: &Path,
        video: &VideoTrackConfig,
        audio: Option<&AudioTrackConfig>,
    ) -> Result<Box<dyn EncoderBackend>, WriterError> {
        Ok(Box::new(GstWriterBackend::new(output, video, audio)?))
    }
}

pub struct GstWriterBackend {
    pipeline: gst::Pipeline,
    video_src: AppSrc,
    audio_src: Option<AppSrc>,
    output: PathBuf,
    width: u32,
    height: u32,
    held: Option<HeldFrame>,
    video_ended: bool,
    video_closed: bool,
    audio_ended: bool,
    frames: u64,
}

/// Last video buffer, not yet handed to the encoder
struct HeldFrame {
    buffer: gst::Buffer,
    pts: MediaTime,
    duration: MediaTime,
}

impl HeldFrame {
    /// Release the buffer with its duration clipped at `end`
    fn close(mut self, end: Option<MediaTime>) -> gst::Buffer {
        let duration = closing_duration(self.pts, self.duration, end);
        if duration != self.duration {
            self.buffer.make_mut().set_duration(clock_time(duration));
        }
        self.buffer
    }
}

/// Duration of the final frame so that it ends no later than `end`
fn closing_duration(pts: MediaTime, duration: MediaTime, end: Option<MediaTime>) -> MediaTime {
    match end {
        Some(end) if end <= pts => MediaTime::ZERO,
        Some(end) => (end - pts).min(duration),
        None => duration,
    }
}

fn make(factory: &str) -> Result<gst::Element, WriterError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| WriterError::OpenFailed(format!("Failed to create {}: {}", factory, e)))
}

fn make_appsrc(name: &str, caps: &gst::Caps) -> Result<AppSrc, WriterError> {
    let appsrc = gst::ElementFactory::make("appsrc")
        .name(name)
        .build()
        .map_err(|e| WriterError::OpenFailed(format!("Failed to create appsrc: {}", e)))?
        .downcast::<AppSrc>()
        .map_err(|_| WriterError::OpenFailed("Failed to downcast to AppSrc".into()))?;

    appsrc.set_caps(Some(caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(false);
    appsrc.set_max_bytes(pipeline_consts::APPSRC_MAX_BYTES);
    Ok(appsrc)
}

/// Convert a relative media time to a GStreamer clock time
fn clock_time(time: MediaTime) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(time.as_nanos().max(0) as u64)
}

/// Copy the visible part of each row into a tightly packed buffer
fn pack_rows(data: &[u8], stride: usize, row_bytes: usize, height: usize) -> Option<Vec<u8>> {
    if stride < row_bytes || height == 0 || data.len() < stride * (height - 1) + row_bytes {
        return None;
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in data.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Some(packed)
}

impl GstWriterBackend {
    pub fn new(
        output: &Path,
        video: &VideoTrackConfig,
        audio: Option<&AudioTrackConfig>,
    ) -> Result<Self, WriterError> {
        gst::init().map_err(|e| WriterError::OpenFailed(format!("GStreamer init failed: {}", e)))?;

        let location = output
            .to_str()
            .ok_or_else(|| WriterError::OpenFailed("Output path is not valid UTF-8".into()))?;

        let encoders = select_encoders(video, audio)?;
        let pipeline = gst::Pipeline::new();

        // Video branch
        let video_caps = gst::Caps::builder("video/x-raw")
            .field("format", video.format.to_gst_format_string())
            .field("width", video.width as i32)
            .field("height", video.height as i32)
            .field(
                "framerate",
                gst::Fraction::new(video.framerate.num as i32, video.framerate.denom as i32),
            )
            .build();
        let video_src = make_appsrc("videosrc", &video_caps)?;
        let video_queue = make("queue")?;
        let videoconvert = make("videoconvert")?;

        let muxer = make("mp4mux")?;
        // Non-streamable output gets a proper index and duration
        if muxer.has_property("streamable") {
            muxer.set_property("streamable", false);
        }
        if let Some(setter) = muxer.dynamic_cast_ref::<gst::TagSetter>() {
            let orientation = video.orientation.image_orientation_tag();
            setter.add_tag::<gst::tags::ImageOrientation>(&orientation, gst::TagMergeMode::Replace);
            debug!(orientation, "Tagged recording orientation");
        }
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| WriterError::OpenFailed(format!("Failed to create filesink: {}", e)))?;

        let mut video_chain: Vec<&gst::Element> = vec![
            video_src.upcast_ref(),
            &video_queue,
            &videoconvert,
            &encoders.video.encoder,
        ];
        if let Some(ref parser) = encoders.video.parser {
            video_chain.push(parser);
        }

        pipeline
            .add_many(&video_chain)
            .map_err(|e| WriterError::OpenFailed(format!("Failed to add video elements: {}", e)))?;
        pipeline
            .add_many([&muxer, &filesink])
            .map_err(|e| WriterError::OpenFailed(format!("Failed to add muxer: {}", e)))?;

        gst::Element::link_many(&video_chain)
            .map_err(|_| WriterError::OpenFailed("Failed to link video chain".into()))?;
        if let Some(last) = video_chain.last() {
            last.link(&muxer)
                .map_err(|_| WriterError::OpenFailed("Failed to link video encoder to muxer".into()))?;
        }
        muxer
            .link(&filesink)
            .map_err(|_| WriterError::OpenFailed("Failed to link muxer to filesink".into()))?;

        // Audio branch
        let audio_src = match (audio, encoders.audio) {
            (Some(config), Some(selected)) => {
                let audio_caps = gst::Caps::builder("audio/x-raw")
                    .field("format", "S16LE")
                    .field("layout", "interleaved")
                    .field("rate", config.sample_rate as i32)
                    .field("channels", config.channels as i32)
                    .build();
                let audio_src = make_appsrc("audiosrc", &audio_caps)?;
                let audio_queue = make("queue")?;
                let audioconvert = make("audioconvert")?;
                let audioresample = make("audioresample")?;

                let audio_chain: [&gst::Element; 5] = [
                    audio_src.upcast_ref(),
                    &audio_queue,
                    &audioconvert,
                    &audioresample,
                    &selected.encoder,
                ];
                pipeline.add_many(audio_chain).map_err(|e| {
                    WriterError::OpenFailed(format!("Failed to add audio elements: {}", e))
                })?;
                gst::Element::link_many(audio_chain)
                    .map_err(|_| WriterError::OpenFailed("Failed to link audio chain".into()))?;
                selected.encoder.link(&muxer).map_err(|_| {
                    WriterError::OpenFailed("Failed to link audio encoder to muxer".into())
                })?;
                Some(audio_src)
            }
            _ => None,
        };

        debug!(
            path = %output.display(),
            audio = audio_src.is_some(),
            "Writer pipeline built"
        );

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            output: output.to_path_buf(),
            width: video.width,
            height: video.height,
            held: None,
            video_ended: false,
            video_closed: false,
            audio_ended: false,
            frames: 0,
        })
    }

    fn push_held(&mut self, end: Option<MediaTime>) -> Result<(), WriterError> {
        let Some(held) = self.held.take() else {
            return Ok(());
        };
        self.video_src
            .push_buffer(held.close(end))
            .map_err(|e| WriterError::Faulted(format!("Failed to push video: {:?}", e)))?;
        Ok(())
    }

    /// Push the held frame cut at `end`, then EOS the video input
    fn close_video(&mut self, end: Option<MediaTime>) {
        if self.video_closed {
            return;
        }
        self.video_closed = true;
        if let Err(e) = self.push_held(end) {
            warn!(error = %e, "Failed to push final video frame");
        }
        if let Err(e) = self.video_src.end_of_stream() {
            warn!(?e, "Failed to send EOS on video input");
        }
    }

    /// Wait for EOS to reach the sink, or an error
    fn wait_for_eos(&self) -> Result<(), WriterError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| WriterError::FinishFailed("No bus on pipeline".into()))?;

        let msg = bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(timing::FINISH_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        );
        match msg.as_ref().map(|m| m.view()) {
            Some(gst::MessageView::Eos(_)) => Ok(()),
            Some(gst::MessageView::Error(err)) => Err(WriterError::FinishFailed(format!(
                "{} ({:?})",
                err.error(),
                err.debug()
            ))),
            _ => Err(WriterError::FinishFailed(
                "Timeout waiting for the muxer to finish".into(),
            )),
        }
    }
}

impl EncoderBackend for GstWriterBackend {
    fn start(&mut self) -> Result<(), WriterError> {
        info!(path = %self.output.display(), "Starting writer pipeline");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| WriterError::StartFailed(format!("Failed to start pipeline: {}", e)))?;

        // Catch elements that fail right away (unwritable file, encoder init)
        if let Some(err) = self.take_fault() {
            return Err(WriterError::StartFailed(err.to_string()));
        }
        Ok(())
    }

    fn is_video_ready(&self) -> bool {
        !self.video_ended && self.video_src.current_level_bytes() < pipeline_consts::APPSRC_MAX_BYTES
    }

    fn is_audio_ready(&self) -> bool {
        self.audio_src.as_ref().is_some_and(|src| {
            !self.audio_ended && src.current_level_bytes() < pipeline_consts::APPSRC_MAX_BYTES
        })
    }

    fn push_video(
        &mut self,
        frame: &VideoFrame,
        pts: MediaTime,
        duration: MediaTime,
    ) -> Result<(), WriterError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(WriterError::Faulted(format!(
                "Frame size {}x{} doesn't match track {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let row_bytes = (frame.width * frame.format.bytes_per_pixel()) as usize;
        let expected = row_bytes * frame.height as usize;

        let mut buffer = if frame.stride as usize == row_bytes && frame.data.len() == expected {
            // Zero-copy: the buffer keeps the capture mapping alive
            gst::Buffer::from_slice(frame.data.clone())
        } else {
            let packed = pack_rows(&frame.data, frame.stride as usize, row_bytes, frame.height as usize)
                .ok_or_else(|| WriterError::Faulted("Frame buffer too small".into()))?;
            gst::Buffer::from_mut_slice(packed)
        };

        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(clock_time(pts));
            buffer_ref.set_duration(clock_time(duration));
        }

        self.push_held(None)?;
        self.held = Some(HeldFrame {
            buffer,
            pts,
            duration,
        });

        self.frames += 1;
        if self.frames % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(frames = self.frames, pts = %pts, "Video frames pushed");
        }
        Ok(())
    }

    fn push_audio(&mut self, chunk: &AudioChunk, pts: MediaTime) -> Result<(), WriterError> {
        let Some(src) = self.audio_src.as_ref() else {
            return Ok(());
        };
        if chunk.frames() == 0 {
            return Ok(());
        }

        let mut buffer = gst::Buffer::from_slice(chunk.data.clone());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(clock_time(pts));
            buffer_ref.set_duration(clock_time(chunk.duration()));
        }
        src.push_buffer(buffer)
            .map_err(|e| WriterError::Faulted(format!("Failed to push audio: {:?}", e)))?;
        Ok(())
    }

    /// The held frame and EOS go out in `finalize`, once the end point is known
    fn end_video(&mut self) {
        self.video_ended = true;
    }

    fn end_audio(&mut self) {
        if let Some(src) = self.audio_src.as_ref()
            && !self.audio_ended
        {
            self.audio_ended = true;
            if let Err(e) = src.end_of_stream() {
                warn!(?e, "Failed to send EOS on audio input");
            }
        }
    }

    fn take_fault(&mut self) -> Option<WriterError> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Warning]) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    error!(
                        error = %err.error(),
                        debug = ?err.debug(),
                        source = ?err.src().map(|s| s.name()),
                        "GStreamer error while writing"
                    );
                    return Some(WriterError::Faulted(err.error().to_string()));
                }
                gst::MessageView::Warning(w) => {
                    warn!(
                        warning = %w.error(),
                        source = ?w.src().map(|s| s.name()),
                        "GStreamer warning while writing"
                    );
                }
                _ => {}
            }
        }
        None
    }

    fn finalize(mut self: Box<Self>, end: Option<MediaTime>) -> Result<(), WriterError> {
        info!(
            frames = self.frames,
            end = ?end.map(|t| t.as_secs_f64()),
            "Finalizing recording"
        );
        self.close_video(end);
        self.end_audio();

        let drained = self.wait_for_eos();

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| WriterError::FinishFailed(format!("Failed to stop pipeline: {}", e)))?;
        drained?;

        if !self.output.is_file() {
            return Err(WriterError::FinishFailed(format!(
                "{} was not written",
                self.output.display()
            )));
        }
        info!(path = %self.output.display(), "Recording saved");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        debug!(path = %self.output.display(), "Aborting writer pipeline");
        let _ = self.pipeline.set_state(gst::State::Null);
        if self.output.exists()
            && let Err(e) = std::fs::remove_file(&self.output)
        {
            warn!(error = %e, "Failed to remove partial recording");
        }
    }
}

impl Drop for GstWriterBackend {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rows_strips_padding() {
        let data = [1, 2, 0, 3, 4, 0];
        assert_eq!(pack_rows(&data, 3, 2, 2), Some(vec![1, 2, 3, 4]));
        // Last row may omit its padding
        assert_eq!(pack_rows(&data[..5], 3, 2, 2), Some(vec![1, 2, 3, 4]));
        assert_eq!(pack_rows(&data[..4], 3, 2, 2), None);
        assert_eq!(pack_rows(&data, 1, 2, 2), None);
    }

    #[test]
    fn test_closing_duration_stops_at_end() {
        let pts = MediaTime::new(89, 30);
        let frame = MediaTime::new(1, 30);
        assert_eq!(closing_duration(pts, frame, None), frame);
        assert_eq!(closing_duration(pts, frame, Some(pts)), MediaTime::ZERO);
        assert_eq!(
            closing_duration(pts, frame, Some(MediaTime::new(179, 60))),
            MediaTime::new(1, 60)
        );
        // An end point past the frame never stretches it
        assert_eq!(closing_duration(pts, frame, Some(MediaTime::new(4, 1))), frame);
        assert_eq!(
            closing_duration(pts, frame, Some(MediaTime::new(1, 1))),
            MediaTime::ZERO
        );
    }

    #[test]
    fn test_held_frame_duration_is_trimmed() {
        let _ = gst::init();

        let held = |duration: MediaTime| {
            let mut buffer = gst::Buffer::from_mut_slice(vec![0u8; 4]);
            if let Some(buffer_ref) = buffer.get_mut() {
                buffer_ref.set_pts(clock_time(MediaTime::new(2, 1)));
                buffer_ref.set_duration(clock_time(duration));
            }
            HeldFrame {
                buffer,
                pts: MediaTime::new(2, 1),
                duration,
            }
        };

        let frame = MediaTime::new(1, 30);
        let last = held(frame).close(Some(MediaTime::new(2, 1)));
        assert_eq!(last.duration(), Some(gst::ClockTime::ZERO));
        assert_eq!(last.pts(), Some(gst::ClockTime::from_seconds(2)));

        let untouched = held(frame).close(None);
        assert_eq!(untouched.duration(), Some(clock_time(frame)));
    }

    #[test]
    fn test_clock_time_conversion() {
        assert_eq!(clock_time(MediaTime::new(1, 30)).nseconds(), 33_333_333);
        assert_eq!(clock_time(MediaTime::new(-1, 30)).nseconds(), 0);
        assert_eq!(clock_time(MediaTime::new(3, 1)).seconds(), 3);
    }
}
