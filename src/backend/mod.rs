//! Seam between the pipeline logic and the native multimedia framework.
//!
//! Decoders, encoders and the muxer keep their state machines, timestamp
//! handling and format conversion on this side; a backend only supplies
//! packet-level primitives: demuxing, send/receive codec loops and container
//! writing. Every handle a backend returns owns its native context and
//! releases it on drop.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

use crate::error::Result;
use crate::media::{
    CodecParameters, NativeFrame, Packet, PixelFormat, SampleFormat, StreamMetadata, TimeBase,
};
use crate::muxer::MuxerConfig;
use std::path::Path;
use std::sync::Arc;

/// Demuxing side of an opened input file.
pub trait InputContainer: Send {
    fn streams(&self) -> &[StreamMetadata];

    /// Next packet in container order, `None` at end of file.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek so that the next packet of `stream_index` is the last key frame at
    /// or before `timestamp` (in that stream's timebase).
    fn seek(&mut self, stream_index: usize, timestamp: i64) -> Result<()>;

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Send-packet / receive-frame decoding loop.
pub trait PacketDecoder: Send {
    /// Feed one packet. An error means this packet could not be decoded.
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Signal end of input so buffered frames can be drained.
    fn send_eof(&mut self) -> Result<()>;

    /// Next decoded frame, `None` when more input is needed (or fully drained).
    fn receive_frame(&mut self) -> Result<Option<NativeFrame>>;

    /// Drop all buffered state, e.g. after a seek.
    fn reset(&mut self) -> Result<()>;
}

/// Send-frame / receive-packet encoding loop.
pub trait PacketEncoder: Send {
    /// Parameters of the opened codec, handed to the muxer.
    fn parameters(&self) -> CodecParameters;

    /// Samples per frame the codec requires (audio), `None` if any size goes.
    fn frame_size(&self) -> Option<usize> {
        None
    }

    fn send_frame(&mut self, frame: &NativeFrame) -> Result<()>;

    fn send_eof(&mut self) -> Result<()>;

    fn receive_packet(&mut self) -> Result<Option<Packet>>;
}

/// Output container writer.
pub trait ContainerWriter: Send {
    /// Write the header for `streams` (in stream index order) and return the
    /// timebase the container picked for each of them.
    fn write_header(&mut self, streams: &[CodecParameters]) -> Result<Vec<TimeBase>>;

    /// Write a packet whose timestamps are already in the container timebase.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;
}

/// Settings a video encoder is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderSetup {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: TimeBase,
    pub frame_rate: f64,
    /// `None` in constant-quality mode.
    pub bit_rate: Option<u64>,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub thread_count: u32,
    /// Codec private options, applied in order.
    pub options: Vec<(String, String)>,
}

/// Settings an audio encoder is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderSetup {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Preferred layout; the backend may pick another one the codec supports
    /// and reports it through [`PacketEncoder::parameters`].
    pub sample_format: SampleFormat,
    pub time_base: TimeBase,
    pub bit_rate: u64,
    pub thread_count: u32,
    pub options: Vec<(String, String)>,
}

/// Factory for native handles.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_input(&self, path: &Path) -> Result<Box<dyn InputContainer>>;

    /// Open a decoder for `stream`; fails with [`crate::Error::CodecUnsupported`].
    fn open_decoder(&self, stream: &StreamMetadata, thread_count: u32)
    -> Result<Box<dyn PacketDecoder>>;

    /// Fails with [`crate::Error::CodecNotFound`] or [`crate::Error::CodecOpen`].
    fn open_video_encoder(&self, setup: &VideoEncoderSetup) -> Result<Box<dyn PacketEncoder>>;

    /// Fails with [`crate::Error::CodecNotFound`] or [`crate::Error::CodecOpen`].
    fn open_audio_encoder(&self, setup: &AudioEncoderSetup) -> Result<Box<dyn PacketEncoder>>;

    fn create_writer(&self, config: &MuxerConfig) -> Result<Box<dyn ContainerWriter>>;

    fn has_encoder(&self, codec: &str) -> bool;

    fn has_format(&self, format: &str) -> bool;

    /// Encoders this backend knows about, printed by `--list-codecs`.
    fn encoders(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Backend used when none is chosen explicitly.
#[cfg(feature = "ffmpeg")]
pub fn default_backend() -> Result<Arc<dyn MediaBackend>> {
    Ok(Arc::new(ffmpeg::FfmpegBackend::new()))
}

/// Backend used when none is chosen explicitly.
#[cfg(not(feature = "ffmpeg"))]
pub fn default_backend() -> Result<Arc<dyn MediaBackend>> {
    Err(crate::Error::InvalidConfig(String::from(
        "built without a native media backend, rebuild with --features ffmpeg",
    )))
}
