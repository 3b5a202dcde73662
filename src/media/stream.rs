//! Stream-level descriptions: input metadata and encoder output parameters.

use crate::media::{MediaKind, PixelFormat, SampleFormat, TimeBase};

/// Facts about an input stream discovered when the container is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Index of the stream inside its container.
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub time_base: TimeBase,
    /// First timestamp in `time_base`, if the container declares one.
    pub start_time: Option<i64>,
    /// Duration in seconds, if known.
    pub duration: Option<f64>,
    /// Frames (video) or samples (audio), possibly approximate.
    pub frame_count: Option<u64>,
    pub bit_rate: u64,

    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
    /// Native pixel or sample layout name, e.g. `yuv420p10le`.
    pub format_name: Option<String>,

    pub sample_rate: u32,
    pub channels: u16,

    #[cfg(feature = "ffmpeg")]
    pub(crate) native: Option<crate::backend::ffmpeg::NativeParameters>,
}

impl StreamMetadata {
    pub fn video(index: usize, codec: &str, time_base: TimeBase, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base,
            start_time: None,
            duration: None,
            frame_count: None,
            bit_rate: 0,
            width,
            height,
            frame_rate: None,
            format_name: None,
            sample_rate: 0,
            channels: 0,
            #[cfg(feature = "ffmpeg")]
            native: None,
        }
    }

    pub fn audio(
        index: usize,
        codec: &str,
        time_base: TimeBase,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base,
            start_time: None,
            duration: None,
            frame_count: None,
            bit_rate: 0,
            width: 0,
            height: 0,
            frame_rate: None,
            format_name: None,
            sample_rate,
            channels,
            #[cfg(feature = "ffmpeg")]
            native: None,
        }
    }
}

/// Parameters an encoder produced, copied into the muxer when a stream is declared.
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub kind: MediaKind,
    pub codec: String,
    /// Timebase of the packets the encoder emits.
    pub time_base: TimeBase,
    pub bit_rate: u64,

    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,

    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: Option<SampleFormat>,
    /// Samples per audio frame the codec expects, if fixed.
    pub frame_size: Option<usize>,

    #[cfg(feature = "ffmpeg")]
    pub(crate) native: Option<crate::backend::ffmpeg::NativeParameters>,
}

impl CodecParameters {
    pub fn video(
        codec: &str,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        time_base: TimeBase,
    ) -> Self {
        Self {
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base,
            bit_rate: 0,
            width,
            height,
            pixel_format: Some(pixel_format),
            sample_rate: 0,
            channels: 0,
            sample_format: None,
            frame_size: None,
            #[cfg(feature = "ffmpeg")]
            native: None,
        }
    }

    pub fn audio(
        codec: &str,
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        time_base: TimeBase,
    ) -> Self {
        Self {
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base,
            bit_rate: 0,
            width: 0,
            height: 0,
            pixel_format: None,
            sample_rate,
            channels,
            sample_format: Some(sample_format),
            frame_size: None,
            #[cfg(feature = "ffmpeg")]
            native: None,
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_frame_size(mut self, frame_size: Option<usize>) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}
