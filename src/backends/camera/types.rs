// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture backends
//!
//! Timestamps are rational ([`MediaTime`]) so slow-motion remapping and
//! session-relative arithmetic never accumulate floating point drift.

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Nanosecond timescale used by GStreamer clock times
pub const NANOS_TIMESCALE: u32 = 1_000_000_000;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u32, b: u32) -> u128 {
    let (a, b) = (a as u128, b as u128);
    a / gcd(a, b) * b
}

/// A positive rational number (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub denom: u32,
}

impl Rational {
    /// Create a rational, returning `None` unless both parts are positive
    pub fn new(num: u32, denom: u32) -> Option<Self> {
        if num == 0 || denom == 0 {
            return None;
        }
        Some(Self { num, denom })
    }

    /// Integer rational (e.g. 4 becomes 4/1)
    pub fn from_int(value: u32) -> Option<Self> {
        Self::new(value, 1)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.denom)
        }
    }
}

/// Presentation timestamp expressed as `value / timescale` seconds
///
/// Equality and ordering compare the represented instant, so `1/2` and
/// `500/1000` are equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a media time; a zero timescale is treated as 1
    pub fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self::new(nanos as i64, NANOS_TIMESCALE)
    }

    /// Timestamp of frame `index` at the given frame rate
    pub fn from_frame_index(index: u64, framerate: Framerate) -> Self {
        // index * denom / num seconds
        Self::new(index as i64 * framerate.denom as i64, framerate.num).reduced()
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Nanoseconds (truncated toward zero) for handing buffers to GStreamer
    pub fn as_nanos(&self) -> i64 {
        (self.value as i128 * NANOS_TIMESCALE as i128 / self.timescale as i128) as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Smallest equivalent representation
    pub fn reduced(self) -> Self {
        let g = gcd(self.value.unsigned_abs() as u128, self.timescale as u128);
        if g <= 1 {
            return self;
        }
        Self {
            value: self.value / g as i64,
            timescale: (self.timescale as u128 / g) as u32,
        }
    }

    /// Build from a 128-bit value/timescale pair, reducing to fit
    fn from_wide(value: i128, timescale: u128) -> Self {
        let g = gcd(value.unsigned_abs(), timescale).max(1);
        let mut value = value / g as i128;
        let mut timescale = timescale / g;
        // Rescale (losing precision) only if still out of range
        while timescale > u32::MAX as u128 || value.unsigned_abs() > i64::MAX as u128 {
            value /= 2;
            timescale /= 2;
        }
        Self::new(value as i64, timescale as u32)
    }

    fn widened(self, timescale: u128) -> i128 {
        self.value as i128 * (timescale / self.timescale as u128) as i128
    }

    pub fn checked_add(self, other: MediaTime) -> MediaTime {
        let ts = lcm(self.timescale, other.timescale);
        Self::from_wide(self.widened(ts) + other.widened(ts), ts)
    }

    pub fn checked_sub(self, other: MediaTime) -> MediaTime {
        let ts = lcm(self.timescale, other.timescale);
        Self::from_wide(self.widened(ts) - other.widened(ts), ts)
    }

    /// Multiply by a positive rational factor exactly
    pub fn scaled(self, factor: Rational) -> MediaTime {
        Self::from_wide(
            self.value as i128 * factor.num as i128,
            self.timescale as u128 * factor.denom as u128,
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl std::ops::Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        self.checked_add(rhs)
    }
}

impl std::ops::Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        self.checked_sub(rhs)
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}s", self.as_secs_f64())
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num: num.max(1),
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    pub fn from_int(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Divide the rate by a factor (e.g. 120fps captured, 30fps claimed for 4x slow motion)
    pub fn divided_by(&self, factor: Rational) -> Self {
        let num = self.num as u128 * factor.denom as u128;
        let denom = self.denom as u128 * factor.num as u128;
        let g = gcd(num, denom).max(1);
        Self::new(
            (num / g).min(u32::MAX as u128) as u32,
            (denom / g).min(u32::MAX as u128) as u32,
        )
    }

    /// Duration of a single frame
    pub fn frame_duration(&self) -> MediaTime {
        MediaTime::new(self.denom as i64, self.num)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

/// Pixel layouts the recorder and detector understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit R G B A
    RGBA,
    /// 32-bit B G R A (common camera output)
    BGRA,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }

    /// GStreamer video/x-raw format string
    pub fn to_gst_format_string(&self) -> &'static str {
        match self {
            Self::RGBA => "RGBA",
            Self::BGRA => "BGRA",
        }
    }

    pub fn from_gst_format_string(format: &str) -> Option<Self> {
        match format {
            "RGBA" | "RGBx" => Some(Self::RGBA),
            "BGRA" | "BGRx" => Some(Self::BGRA),
            _ => None,
        }
    }
}

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// The `Mapped` variant keeps the GStreamer buffer mapped and alive until all
/// references are dropped, so a frame handed to the detection worker stays
/// valid after the capture source recycles its pool.
#[derive(Clone)]
pub enum FrameData {
    Copied(Arc<[u8]>),
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Mapped(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data.into_boxed_slice()))
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

/// A single decoded video frame
///
/// Cloning is cheap: pixel data is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including padding
    pub stride: u32,
    pub format: PixelFormat,
    pub data: FrameData,
    pub pts: MediaTime,
}

impl VideoFrame {
    /// Tightly packed frame from raw bytes
    pub fn from_bytes(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        pts: MediaTime,
    ) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
            data: data.into(),
            pts,
        }
    }
}

/// Presentation time of a buffer, falling back to its decode time
fn buffer_time(buffer: &gstreamer::BufferRef) -> Option<MediaTime> {
    buffer
        .pts()
        .or_else(|| buffer.dts())
        .map(|t| MediaTime::from_nanos(t.nseconds()))
}

/// Timestamp a sample would be delivered with, if it carries one
pub fn sample_time(sample: &gstreamer::Sample) -> Option<MediaTime> {
    sample.buffer().and_then(buffer_time)
}

impl VideoFrame {
    /// Wrap a raw RGBA/BGRA GStreamer sample without copying its pixels
    pub fn from_gst_sample(sample: &gstreamer::Sample) -> Result<Self, String> {
        let caps = sample.caps().ok_or("No caps on sample")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| format!("Invalid video caps: {}", e))?;
        let format = match info.format() {
            gstreamer_video::VideoFormat::Bgra | gstreamer_video::VideoFormat::Bgrx => {
                PixelFormat::BGRA
            }
            gstreamer_video::VideoFormat::Rgba | gstreamer_video::VideoFormat::Rgbx => {
                PixelFormat::RGBA
            }
            other => return Err(format!("Unexpected pixel format {:?}", other)),
        };

        let buffer = sample.buffer_owned().ok_or("No buffer in sample")?;
        let pts = buffer_time(&buffer).ok_or("Buffer has no timestamp")?;
        let map = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| "Failed to map buffer".to_string())?;

        Ok(Self {
            width: info.width(),
            height: info.height(),
            stride: info.stride()[0] as u32,
            format,
            data: FrameData::from_mapped_buffer(map),
            pts,
        })
    }
}

/// Interleaved signed 16-bit PCM audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u32,
    pub data: FrameData,
    pub pts: MediaTime,
}

impl AudioChunk {
    /// Number of sample frames in the chunk
    pub fn frames(&self) -> usize {
        let bytes_per_frame = (self.channels.max(1) * 2) as usize;
        self.data.len() / bytes_per_frame
    }

    pub fn duration(&self) -> MediaTime {
        MediaTime::new(self.frames() as i64, self.sample_rate.max(1))
    }

    /// Wrap an S16LE interleaved GStreamer sample
    pub fn from_gst_sample(sample: &gstreamer::Sample) -> Result<Self, String> {
        let structure = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .ok_or("No caps on audio sample")?;
        let sample_rate = structure
            .get::<i32>("rate")
            .map_err(|e| format!("No sample rate: {}", e))?;
        let channels = structure
            .get::<i32>("channels")
            .map_err(|e| format!("No channel count: {}", e))?;

        let buffer = sample.buffer_owned().ok_or("No buffer in audio sample")?;
        let pts = buffer_time(&buffer).ok_or("Buffer has no timestamp")?;
        let map = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| "Failed to map audio buffer".to_string())?;

        Ok(Self {
            sample_rate: sample_rate.max(1) as u32,
            channels: channels.max(1) as u32,
            data: FrameData::from_mapped_buffer(map),
            pts,
        })
    }

    /// Copy of the first `frames` sample frames
    pub fn truncated(&self, frames: usize) -> AudioChunk {
        let bytes = (frames * (self.channels.max(1) * 2) as usize).min(self.data.len());
        AudioChunk {
            sample_rate: self.sample_rate,
            channels: self.channels,
            data: self.data[..bytes].to_vec().into(),
            pts: self.pts,
        }
    }
}

/// A unit of captured media
#[derive(Debug, Clone)]
pub enum Sample {
    Video(VideoFrame),
    Audio(AudioChunk),
}

impl Sample {
    pub fn pts(&self) -> MediaTime {
        match self {
            Sample::Video(frame) => frame.pts,
            Sample::Audio(chunk) => chunk.pts,
        }
    }
}

/// Which way the capture device is facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    #[default]
    Back,
    Front,
}

/// Sensor rotation in degrees (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorRotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// GStreamer `videoflip` method name
    pub fn videoflip_method(&self) -> &'static str {
        match self {
            SensorRotation::None => "none",
            SensorRotation::Rotate90 => "clockwise",
            SensorRotation::Rotate180 => "rotate-180",
            SensorRotation::Rotate270 => "counterclockwise",
        }
    }
}

/// Orientation and mirroring of the current capture, written into the
/// recording so players display it upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOrientation {
    pub rotation: SensorRotation,
    pub mirrored: bool,
}

impl CaptureOrientation {
    /// Orientation the reference device records with: portrait, front camera mirrored
    pub fn for_facing(facing: CameraFacing) -> Self {
        Self {
            rotation: SensorRotation::Rotate90,
            mirrored: facing == CameraFacing::Front,
        }
    }

    /// Value of the GStreamer `image-orientation` tag
    pub fn image_orientation_tag(&self) -> &'static str {
        match (self.mirrored, self.rotation) {
            (false, SensorRotation::None) => "rotate-0",
            (false, SensorRotation::Rotate90) => "rotate-90",
            (false, SensorRotation::Rotate180) => "rotate-180",
            (false, SensorRotation::Rotate270) => "rotate-270",
            (true, SensorRotation::None) => "flip-rotate-0",
            (true, SensorRotation::Rotate90) => "flip-rotate-90",
            (true, SensorRotation::Rotate180) => "flip-rotate-180",
            (true, SensorRotation::Rotate270) => "flip-rotate-270",
        }
    }
}

/// Capture format request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
}

impl std::fmt::Display for CameraFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} @ {}fps", self.width, self.height, self.framerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_time_equality_across_timescales() {
        assert_eq!(MediaTime::new(1, 2), MediaTime::new(500, 1000));
        assert!(MediaTime::new(1, 3) < MediaTime::new(334, 1000));
    }

    #[test]
    fn test_media_time_arithmetic_is_exact() {
        let a = MediaTime::new(1, 3);
        let b = MediaTime::new(1, 6);
        assert_eq!(a + b, MediaTime::new(1, 2));
        assert_eq!(a - b, MediaTime::new(1, 6));
        let scaled = MediaTime::new(1, 30).scaled(Rational::new(4, 1).unwrap());
        assert_eq!(scaled, MediaTime::new(2, 15));
    }

    #[test]
    fn test_frame_index_timestamps() {
        let fps = Framerate::from_int(30);
        assert_eq!(MediaTime::from_frame_index(90, fps), MediaTime::new(3, 1));
        assert_eq!(fps.frame_duration(), MediaTime::new(1, 30));
    }

    fn bgra_sample(pts: Option<u64>, dts: Option<u64>) -> gstreamer::Sample {
        let caps = gstreamer_video::VideoInfo::builder(gstreamer_video::VideoFormat::Bgra, 2, 2)
            .build()
            .unwrap()
            .to_caps()
            .unwrap();
        let mut buffer = gstreamer::Buffer::from_mut_slice(vec![0u8; 16]);
        {
            let buffer_ref = buffer.get_mut().unwrap();
            buffer_ref.set_pts(pts.map(gstreamer::ClockTime::from_mseconds));
            buffer_ref.set_dts(dts.map(gstreamer::ClockTime::from_mseconds));
        }
        gstreamer::Sample::builder().buffer(&buffer).caps(&caps).build()
    }

    #[test]
    fn test_untimed_samples_are_rejected() {
        let _ = gstreamer::init();

        let timed = VideoFrame::from_gst_sample(&bgra_sample(Some(500), Some(400))).unwrap();
        assert_eq!(timed.pts, MediaTime::new(1, 2));

        let decode_only = bgra_sample(None, Some(250));
        assert_eq!(sample_time(&decode_only), Some(MediaTime::new(1, 4)));
        assert_eq!(
            VideoFrame::from_gst_sample(&decode_only).unwrap().pts,
            MediaTime::new(1, 4)
        );

        let untimed = bgra_sample(None, None);
        assert_eq!(sample_time(&untimed), None);
        let err = VideoFrame::from_gst_sample(&untimed).unwrap_err();
        assert!(err.contains("timestamp"));
    }

    #[test]
    fn test_nanos_conversion() {
        assert_eq!(MediaTime::new(3, 2).as_nanos(), 1_500_000_000);
        assert_eq!(MediaTime::from_nanos(250), MediaTime::new(1, 4_000_000));
    }

    #[test]
    fn test_rational_rejects_zero() {
        assert!(Rational::new(0, 1).is_none());
        assert!(Rational::new(1, 0).is_none());
        assert_eq!(
            Framerate::from_int(120).divided_by(Rational::from_int(4).unwrap()),
            Framerate::from_int(30)
        );
    }

    #[test]
    fn test_front_camera_orientation_is_mirrored() {
        let front = CaptureOrientation::for_facing(CameraFacing::Front);
        assert_eq!(front.image_orientation_tag(), "flip-rotate-90");
        let back = CaptureOrientation::for_facing(CameraFacing::Back);
        assert_eq!(back.image_orientation_tag(), "rotate-90");
        assert_eq!(SensorRotation::from_degrees_int(-90), SensorRotation::Rotate270);
    }

    #[test]
    fn test_audio_chunk_duration() {
        let chunk = AudioChunk {
            sample_rate: 44_100,
            channels: 1,
            data: vec![0u8; 4410 * 2].into(),
            pts: MediaTime::ZERO,
        };
        assert_eq!(chunk.frames(), 4410);
        assert_eq!(chunk.duration(), MediaTime::new(1, 10));
    }
}
