//! Stream decoders
//!
//! A decoder opens one elementary stream of a file and yields frames in a fixed
//! output layout: packed pixels of the configured format for video, interleaved
//! samples of the configured format/rate/channels for audio.

mod audio;
mod session;
mod shared;
mod video;

pub use audio::AudioDecoder;
pub use shared::SharedDecoder;
pub use video::VideoDecoder;

use crate::error::Result;
use crate::media::{PixelFormat, SampleFormat, StreamMetadata};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output layout and limits of a [`VideoDecoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoDecoderConfig {
    pub pixel_format: PixelFormat,
    /// Frames larger than this are scaled down, keeping the aspect ratio.
    /// 0 = unbounded.
    pub max_width: u32,
    pub max_height: u32,
    /// 0 = let the codec decide.
    pub thread_count: u32,
}

impl Default for VideoDecoderConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Bgr24,
            max_width: 0,
            max_height: 0,
            thread_count: 0,
        }
    }
}

/// Output layout of an [`AudioDecoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDecoderConfig {
    pub sample_format: SampleFormat,
    /// 0 = keep the source rate.
    pub sample_rate: u32,
    /// 0 = keep the source channel count.
    pub channels: u16,
    pub thread_count: u32,
}

impl Default for AudioDecoderConfig {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::S16,
            sample_rate: 44_100,
            channels: 2,
            thread_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub video: VideoDecoderConfig,
    pub audio: AudioDecoderConfig,
    pub enable_video: bool,
    pub enable_audio: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            video: VideoDecoderConfig::default(),
            audio: AudioDecoderConfig::default(),
            enable_video: true,
            enable_audio: true,
        }
    }
}

/// Counters of a decoding session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStatistics {
    /// Packets of the decoded stream pulled from the container.
    pub packets_read: u64,
    /// Packets (or frames) the codec rejected and that were skipped.
    pub packets_skipped: u64,
    pub frames_decoded: u64,
}

/// Common contract of the video and audio decoders.
pub trait StreamDecoder: Send {
    type Frame;

    /// Open the first stream of this decoder's media type in `path`.
    ///
    /// Fails with [`NoSuchStream`](crate::Error::NoSuchStream),
    /// [`CodecUnsupported`](crate::Error::CodecUnsupported) or
    /// [`Open`](crate::Error::Open). Reopening closes the previous file first.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Next frame, `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<Self::Frame>>;

    /// Seek backwards to the key frame at or before `seconds`.
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// Release the conversion context, the codec and the container, in that order.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn metadata(&self) -> Option<&StreamMetadata>;

    /// Timestamp of the last delivered frame, in seconds.
    fn current_time(&self) -> f64;

    fn statistics(&self) -> DecoderStatistics;

    /// Read every remaining frame.
    fn read_all(&mut self) -> Result<Vec<Self::Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read_next()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
