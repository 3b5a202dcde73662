//! FFmpeg backend built on `ac-ffmpeg`.

mod codec;
mod input;
mod output;

use crate::backend::{
    AudioEncoderSetup, ContainerWriter, InputContainer, MediaBackend, PacketDecoder,
    PacketEncoder, VideoEncoderSetup,
};
use crate::error::{Error, Result};
use crate::media::{MediaKind, PixelFormat, SampleFormat, TimeBase};
use crate::muxer::MuxerConfig;
use ac_ffmpeg::codec::audio::AudioEncoder;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::video::VideoEncoder;
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::format::muxer::OutputFormat;
use std::path::Path;

/// Encoders checked for by [`MediaBackend::encoders`].
const KNOWN_ENCODERS: &[&str] = &[
    "libx264",
    "libx265",
    "h264_nvenc",
    "hevc_nvenc",
    "libvpx-vp9",
    "libaom-av1",
    "mpeg4",
    "rawvideo",
    "aac",
    "libmp3lame",
    "libopus",
    "flac",
    "pcm_s16le",
    "pcm_f32le",
];

/// Codec parameters as FFmpeg holds them, including extradata.
#[derive(Clone)]
pub(crate) struct NativeParameters(pub(crate) ac_ffmpeg::codec::CodecParameters);

// The wrapped AVCodecParameters is only ever read through `&self`.
unsafe impl Send for NativeParameters {}
unsafe impl Sync for NativeParameters {}

impl std::fmt::Debug for NativeParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NativeParameters").finish()
    }
}

/// Native handles never take part in metadata comparisons.
impl PartialEq for NativeParameters {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open_input(&self, path: &Path) -> Result<Box<dyn InputContainer>> {
        Ok(Box::new(input::FfmpegInput::open(path)?))
    }

    fn open_decoder(
        &self,
        stream: &crate::media::StreamMetadata,
        thread_count: u32,
    ) -> Result<Box<dyn PacketDecoder>> {
        let parameters = stream
            .native
            .as_ref()
            .ok_or_else(|| Error::CodecUnsupported(stream.codec.clone()))?;
        match stream.kind {
            MediaKind::Video => Ok(Box::new(codec::FfmpegVideoDecoder::new(
                parameters.clone(),
                stream.time_base,
                thread_count,
            )?)),
            MediaKind::Audio => Ok(Box::new(codec::FfmpegAudioDecoder::new(
                parameters.clone(),
                stream.time_base,
                thread_count,
            )?)),
        }
    }

    fn open_video_encoder(&self, setup: &VideoEncoderSetup) -> Result<Box<dyn PacketEncoder>> {
        Ok(Box::new(codec::FfmpegVideoEncoder::new(setup)?))
    }

    fn open_audio_encoder(&self, setup: &AudioEncoderSetup) -> Result<Box<dyn PacketEncoder>> {
        Ok(Box::new(codec::FfmpegAudioEncoder::new(setup)?))
    }

    fn create_writer(&self, config: &MuxerConfig) -> Result<Box<dyn ContainerWriter>> {
        Ok(Box::new(output::FfmpegWriter::create(config)?))
    }

    fn has_encoder(&self, codec: &str) -> bool {
        VideoEncoder::builder(codec).is_ok() || AudioEncoder::builder(codec).is_ok()
    }

    fn has_format(&self, format: &str) -> bool {
        OutputFormat::find_by_name(format).is_some()
    }

    fn encoders(&self) -> Vec<String> {
        KNOWN_ENCODERS
            .iter()
            .filter(|codec| self.has_encoder(codec))
            .map(|codec| codec.to_string())
            .collect()
    }
}

fn to_native_time_base(time_base: TimeBase) -> ac_ffmpeg::time::TimeBase {
    ac_ffmpeg::time::TimeBase::new(time_base.num(), time_base.den())
}

fn from_native_time_base(time_base: ac_ffmpeg::time::TimeBase) -> TimeBase {
    TimeBase::new(time_base.num() as i32, time_base.den() as i32)
}

fn to_native_pixel_format(format: PixelFormat) -> ac_ffmpeg::codec::video::frame::PixelFormat {
    get_pixel_format(format.name())
}

fn from_native_pixel_format(
    format: ac_ffmpeg::codec::video::frame::PixelFormat,
) -> Option<PixelFormat> {
    PixelFormat::ALL
        .into_iter()
        .find(|f| get_pixel_format(f.name()) == format)
}

fn to_native_sample_format(format: SampleFormat) -> ac_ffmpeg::codec::audio::frame::SampleFormat {
    get_sample_format(format.name())
}

fn from_native_sample_format(
    format: ac_ffmpeg::codec::audio::frame::SampleFormat,
) -> Option<SampleFormat> {
    SampleFormat::ALL
        .into_iter()
        .find(|f| get_sample_format(f.name()) == format)
}
