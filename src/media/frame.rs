//! Decoded frame types exchanged between pipeline stages.

use crate::error::{Error, Result};
use crate::media::{PixelFormat, SampleFormat};
use serde::{Deserialize, Serialize};

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// Decoded video frame with packed pixel data.
#[derive(Clone)]
pub struct VideoFrame {
    /// Tightly packed pixels (no row padding) in `format`.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Presentation timestamp in seconds.
    pub pts: f64,

    /// Presentation timestamp in the source stream timebase.
    pub raw_pts: i64,

    /// Position of the frame in its decoder's output sequence.
    pub index: u64,

    /// Free-form label of the stages the frame went through (e.g. `video+upscale`).
    pub source: String,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            pts: 0.0,
            raw_pts: 0,
            index: 0,
            source: String::from("video"),
        }
    }

    /// Set the timing fields.
    pub fn with_timing(mut self, pts: f64, raw_pts: i64, index: u64) -> Self {
        self.pts = pts;
        self.raw_pts = raw_pts;
        self.index = index;
        self
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer length matches the declared geometry.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("pts", &self.pts)
            .field("raw_pts", &self.raw_pts)
            .field("index", &self.index)
            .field("source", &self.source)
            .field("size", &self.size())
            .finish()
    }
}

/// Decoded audio frame with interleaved samples.
#[derive(Clone)]
pub struct AudioFrame {
    /// Interleaved samples in `format`.
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel.
    pub samples: usize,
    pub format: SampleFormat,
    pub pts: f64,
    pub raw_pts: i64,
    pub index: u64,
}

impl AudioFrame {
    pub fn new(
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
        samples: usize,
        format: SampleFormat,
    ) -> Self {
        Self {
            data,
            sample_rate,
            channels,
            samples,
            format,
            pts: 0.0,
            raw_pts: 0,
            index: 0,
        }
    }

    pub fn with_timing(mut self, pts: f64, raw_pts: i64, index: u64) -> Self {
        self.pts = pts;
        self.raw_pts = raw_pts;
        self.index = index;
        self
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples as f64 / self.sample_rate as f64
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("samples", &self.samples)
            .field("format", &self.format)
            .field("pts", &self.pts)
            .field("raw_pts", &self.raw_pts)
            .field("index", &self.index)
            .finish()
    }
}

/// A video or an audio frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self {
            Frame::Video(_) => MediaKind::Video,
            Frame::Audio(_) => MediaKind::Audio,
        }
    }

    /// Presentation timestamp in seconds.
    pub fn pts(&self) -> f64 {
        match self {
            Frame::Video(frame) => frame.pts,
            Frame::Audio(frame) => frame.pts,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Frame::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Frame::Audio(_))
    }

    pub fn as_video(&self) -> Result<&VideoFrame> {
        match self {
            Frame::Video(frame) => Ok(frame),
            Frame::Audio(_) => Err(self.wrong_kind(MediaKind::Video)),
        }
    }

    pub fn as_audio(&self) -> Result<&AudioFrame> {
        match self {
            Frame::Audio(frame) => Ok(frame),
            Frame::Video(_) => Err(self.wrong_kind(MediaKind::Audio)),
        }
    }

    pub fn into_video(self) -> Result<VideoFrame> {
        match self {
            Frame::Video(frame) => Ok(frame),
            Frame::Audio(_) => Err(self.wrong_kind(MediaKind::Video)),
        }
    }

    pub fn into_audio(self) -> Result<AudioFrame> {
        match self {
            Frame::Audio(frame) => Ok(frame),
            Frame::Video(_) => Err(self.wrong_kind(MediaKind::Audio)),
        }
    }

    fn wrong_kind(&self, expected: MediaKind) -> Error {
        Error::WrongFrameKind {
            expected,
            found: self.kind(),
        }
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}
