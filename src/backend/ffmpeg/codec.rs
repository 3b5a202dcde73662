use super::{
    NativeParameters, from_native_pixel_format, from_native_sample_format, to_native_pixel_format,
    to_native_sample_format, to_native_time_base,
};
use crate::backend::{AudioEncoderSetup, PacketDecoder, PacketEncoder, VideoEncoderSetup};
use crate::error::{Error, Result};
use crate::media::{
    CodecParameters, NativeAudio, NativeFrame, NativeVideo, Packet, PixelFormat, Plane,
    SampleFormat, TimeBase,
};
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioEncoder, AudioFrame, AudioFrameMut, ChannelLayout};
use ac_ffmpeg::codec::video::{
    VideoDecoder, VideoEncoder, VideoFrame, VideoFrameMut, VideoFrameScaler,
};
use ac_ffmpeg::codec::{Decoder, Encoder};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::Timestamp;
use bytes::Bytes;

/// Formats tried when an audio codec refuses the requested sample layout.
const SAMPLE_FORMAT_FALLBACK: [SampleFormat; 4] = [
    SampleFormat::Fltp,
    SampleFormat::Flt,
    SampleFormat::S16p,
    SampleFormat::S16,
];

fn timestamp(ts: Timestamp) -> Option<i64> {
    if ts.is_null() {
        None
    } else {
        Some(ts.timestamp())
    }
}

fn native_timestamp(value: Option<i64>, time_base: TimeBase) -> Timestamp {
    match value {
        Some(value) => Timestamp::new(value, to_native_time_base(time_base)),
        None => Timestamp::null(),
    }
}

fn to_native_packet(packet: &Packet) -> ac_ffmpeg::packet::Packet {
    PacketMut::from(packet.data.as_ref())
        .with_pts(native_timestamp(packet.pts, packet.time_base))
        .with_dts(native_timestamp(packet.dts, packet.time_base))
        .with_stream_index(packet.stream_index)
        .freeze()
}

fn from_native_packet(packet: &ac_ffmpeg::packet::Packet, time_base: TimeBase) -> Packet {
    let mut out = Packet::new(Bytes::copy_from_slice(packet.data()), time_base)
        .with_key_flag(packet.is_key());
    out.pts = timestamp(packet.pts());
    out.dts = timestamp(packet.dts());
    out
}

/// Copy `rows` rows of `row` bytes between two strided buffers.
fn copy_rows(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, row: usize, rows: usize) {
    for r in 0..rows {
        let (s, d) = (r * src_stride, r * dst_stride);
        if s + row > src.len() || d + row > dst.len() {
            break;
        }
        dst[d..d + row].copy_from_slice(&src[s..s + row]);
    }
}

pub(super) struct FfmpegVideoDecoder {
    decoder: VideoDecoder,
    parameters: NativeParameters,
    time_base: TimeBase,
    thread_count: u32,
    /// Converts layouts the pipeline does not handle to yuv420p.
    scaler: Option<(VideoFrameScaler, (usize, usize, ac_ffmpeg::codec::video::frame::PixelFormat))>,
}

// Owned and driven by a single decoder at a time.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub(super) fn new(parameters: NativeParameters, time_base: TimeBase, thread_count: u32) -> Result<Self> {
        let decoder = Self::build(&parameters, time_base, thread_count)?;
        Ok(Self {
            decoder,
            parameters,
            time_base,
            thread_count,
            scaler: None,
        })
    }

    fn build(parameters: &NativeParameters, time_base: TimeBase, thread_count: u32) -> Result<VideoDecoder> {
        let name = parameters.0.decoder_name().unwrap_or("unknown");
        let video = parameters
            .0
            .as_video_codec_parameters()
            .ok_or_else(|| Error::CodecUnsupported(name.to_string()))?;
        VideoDecoder::from_codec_parameters(video)
            .map_err(|_| Error::CodecUnsupported(name.to_string()))?
            .time_base(to_native_time_base(time_base))
            .set_option("threads", thread_count)
            .build()
            .map_err(|e| Error::codec_open(name, e))
    }

    fn to_native(&mut self, frame: VideoFrame) -> Result<NativeVideo> {
        let (format, frame) = match from_native_pixel_format(frame.pixel_format()) {
            Some(format) => (format, frame),
            None => (PixelFormat::Yuv420p, self.convert(&frame)?),
        };

        let (width, height) = (frame.width() as u32, frame.height() as u32);
        let planes = frame.planes();
        let planes = format
            .planes(width, height)
            .into_iter()
            .enumerate()
            .map(|(i, (_, rows))| {
                let stride = planes[i].line_size();
                let data = planes[i].data();
                let len = (stride * rows).min(data.len());
                Plane {
                    data: data[..len].to_vec(),
                    stride,
                }
            })
            .collect();

        Ok(NativeVideo {
            width,
            height,
            format,
            planes,
            pts: timestamp(frame.pts()),
        })
    }

    fn convert(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        let key = (frame.width(), frame.height(), frame.pixel_format());
        if self.scaler.as_ref().is_none_or(|(_, cached)| *cached != key) {
            let scaler = VideoFrameScaler::builder()
                .source_pixel_format(key.2)
                .source_width(key.0)
                .source_height(key.1)
                .target_pixel_format(to_native_pixel_format(PixelFormat::Yuv420p))
                .target_width(key.0)
                .target_height(key.1)
                .build()
                .map_err(|e| Error::Decode(e.to_string()))?;
            self.scaler = Some((scaler, key));
        }
        let Some((scaler, _)) = self.scaler.as_mut() else {
            return Err(Error::Decode(String::from("no pixel format converter")));
        };
        scaler.scale(frame).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl PacketDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .try_push(to_native_packet(packet))
            .map_err(|e| Error::Decode(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder
            .try_flush()
            .map_err(|e| Error::Decode(e.to_string()))
    }

    fn receive_frame(&mut self) -> Result<Option<NativeFrame>> {
        match self.decoder.take() {
            Ok(Some(frame)) => Ok(Some(NativeFrame::Video(self.to_native(frame)?))),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Decode(e.to_string())),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.decoder = Self::build(&self.parameters, self.time_base, self.thread_count)?;
        Ok(())
    }
}

pub(super) struct FfmpegAudioDecoder {
    decoder: AudioDecoder,
    parameters: NativeParameters,
    time_base: TimeBase,
    thread_count: u32,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    pub(super) fn new(parameters: NativeParameters, time_base: TimeBase, thread_count: u32) -> Result<Self> {
        let decoder = Self::build(&parameters, time_base, thread_count)?;
        Ok(Self {
            decoder,
            parameters,
            time_base,
            thread_count,
        })
    }

    fn build(parameters: &NativeParameters, time_base: TimeBase, thread_count: u32) -> Result<AudioDecoder> {
        let name = parameters.0.decoder_name().unwrap_or("unknown");
        let audio = parameters
            .0
            .as_audio_codec_parameters()
            .ok_or_else(|| Error::CodecUnsupported(name.to_string()))?;
        AudioDecoder::from_codec_parameters(audio)
            .map_err(|_| Error::CodecUnsupported(name.to_string()))?
            .time_base(to_native_time_base(time_base))
            .set_option("threads", thread_count)
            .build()
            .map_err(|e| Error::codec_open(name, e))
    }
}

/// Copy an FFmpeg audio frame out, widening layouts the pipeline does not
/// handle (u8, s32, dbl and their planar forms) to 32-bit float.
fn to_native_audio(frame: &AudioFrame) -> Result<NativeAudio> {
    let channels = frame.channel_layout().channels() as u16;
    let samples = frame.samples();
    let native_format = frame.sample_format();
    let planes = frame.planes();

    let (format, planes) = match from_native_sample_format(native_format) {
        Some(format) => {
            let per_plane = if format.is_planar() {
                samples * format.bytes_per_sample()
            } else {
                samples * format.bytes_per_sample() * channels as usize
            };
            let planes = planes
                .iter()
                .map(|p| p.data()[..per_plane.min(p.data().len())].to_vec())
                .collect();
            (format, planes)
        }
        None => {
            let (width, convert): (usize, fn(&[u8]) -> f32) = if native_format
                == get_sample_format("u8")
                || native_format == get_sample_format("u8p")
            {
                (1, |b| (b[0] as f32 - 128.0) / 128.0)
            } else if native_format == get_sample_format("s32")
                || native_format == get_sample_format("s32p")
            {
                (4, |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / i32::MAX as f32)
            } else if native_format == get_sample_format("dbl")
                || native_format == get_sample_format("dblp")
            {
                (8, |b| {
                    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
                })
            } else {
                return Err(Error::Decode(String::from("unsupported sample format")));
            };

            let planar = planes.len() > 1 || channels == 1;
            let format = if planar { SampleFormat::Fltp } else { SampleFormat::Flt };
            let per_plane = if planar { samples } else { samples * channels as usize };
            let planes = planes
                .iter()
                .map(|p| {
                    p.data()
                        .chunks_exact(width)
                        .take(per_plane)
                        .flat_map(|b| convert(b).to_le_bytes())
                        .collect()
                })
                .collect();
            (format, planes)
        }
    };

    Ok(NativeAudio {
        sample_rate: frame.sample_rate(),
        channels,
        samples,
        format,
        planes,
        pts: timestamp(frame.pts()),
    })
}

impl PacketDecoder for FfmpegAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .try_push(to_native_packet(packet))
            .map_err(|e| Error::Decode(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder
            .try_flush()
            .map_err(|e| Error::Decode(e.to_string()))
    }

    fn receive_frame(&mut self) -> Result<Option<NativeFrame>> {
        match self.decoder.take() {
            Ok(Some(frame)) => Ok(Some(NativeFrame::Audio(to_native_audio(&frame)?))),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Decode(e.to_string())),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.decoder = Self::build(&self.parameters, self.time_base, self.thread_count)?;
        Ok(())
    }
}

pub(super) struct FfmpegVideoEncoder {
    encoder: VideoEncoder,
    setup: VideoEncoderSetup,
}

// Owned and driven by a single encoder at a time.
unsafe impl Send for FfmpegVideoEncoder {}

impl FfmpegVideoEncoder {
    pub(super) fn new(setup: &VideoEncoderSetup) -> Result<Self> {
        let mut builder = VideoEncoder::builder(&setup.codec)
            .map_err(|_| Error::CodecNotFound(setup.codec.clone()))?
            .pixel_format(to_native_pixel_format(setup.pixel_format))
            .width(setup.width as usize)
            .height(setup.height as usize)
            .time_base(to_native_time_base(setup.time_base))
            .set_option("g", setup.gop_size)
            .set_option("bf", setup.max_b_frames)
            .set_option("threads", setup.thread_count);
        if let Some(bit_rate) = setup.bit_rate {
            builder = builder.set_option("b", bit_rate);
        }
        for (k, v) in &setup.options {
            builder = builder.set_option(k, v);
        }

        let encoder = builder
            .build()
            .map_err(|e| Error::codec_open(&setup.codec, e))?;
        Ok(Self {
            encoder,
            setup: setup.clone(),
        })
    }

    fn to_frame(&self, native: &NativeVideo) -> VideoFrame {
        let mut frame = VideoFrameMut::black(
            to_native_pixel_format(native.format),
            native.width as usize,
            native.height as usize,
        );
        {
            let mut planes = frame.planes_mut();
            for (i, ((row, rows), src)) in native
                .format
                .planes(native.width, native.height)
                .into_iter()
                .zip(&native.planes)
                .enumerate()
            {
                let stride = planes[i].line_size();
                copy_rows(planes[i].data_mut(), stride, &src.data, src.stride, row, rows);
            }
        }
        frame
            .with_pts(native_timestamp(native.pts, self.setup.time_base))
            .freeze()
    }
}

impl PacketEncoder for FfmpegVideoEncoder {
    fn parameters(&self) -> CodecParameters {
        let mut parameters = CodecParameters::video(
            &self.setup.codec,
            self.setup.width,
            self.setup.height,
            self.setup.pixel_format,
            self.setup.time_base,
        )
        .with_bit_rate(self.setup.bit_rate.unwrap_or(0));
        parameters.native = Some(NativeParameters(self.encoder.codec_parameters().into()));
        parameters
    }

    fn send_frame(&mut self, frame: &NativeFrame) -> Result<()> {
        let NativeFrame::Video(native) = frame else {
            return Err(Error::Encode(String::from("audio frame sent to a video encoder")));
        };
        let frame = self.to_frame(native);
        self.encoder
            .try_push(frame)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.encoder
            .try_flush()
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        let packet = self
            .encoder
            .take()
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(packet.map(|p| from_native_packet(&p, self.setup.time_base)))
    }
}

pub(super) struct FfmpegAudioEncoder {
    encoder: AudioEncoder,
    setup: AudioEncoderSetup,
    sample_format: SampleFormat,
}

unsafe impl Send for FfmpegAudioEncoder {}

impl FfmpegAudioEncoder {
    pub(super) fn new(setup: &AudioEncoderSetup) -> Result<Self> {
        AudioEncoder::builder(&setup.codec).map_err(|_| Error::CodecNotFound(setup.codec.clone()))?;

        let mut candidates = vec![setup.sample_format];
        candidates.extend(SAMPLE_FORMAT_FALLBACK.iter().filter(|f| **f != setup.sample_format));

        let mut last_error = None;
        for sample_format in candidates {
            match Self::build(setup, sample_format) {
                Ok(encoder) => {
                    return Ok(Self {
                        encoder,
                        setup: setup.clone(),
                        sample_format,
                    });
                }
                Err(e) => {
                    log::debug!(
                        "Encoder {} rejected sample format {}: {}",
                        setup.codec,
                        sample_format.name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::CodecNotFound(setup.codec.clone())))
    }

    fn build(setup: &AudioEncoderSetup, sample_format: SampleFormat) -> Result<AudioEncoder> {
        let layout = ChannelLayout::from_channels(setup.channels as u32).ok_or_else(|| {
            Error::codec_open(&setup.codec, format!("{} channels", setup.channels))
        })?;

        let mut builder = AudioEncoder::builder(&setup.codec)
            .map_err(|_| Error::CodecNotFound(setup.codec.clone()))?
            .sample_rate(setup.sample_rate)
            .channel_layout(layout)
            .sample_format(to_native_sample_format(sample_format))
            .time_base(to_native_time_base(setup.time_base))
            .set_option("b", setup.bit_rate)
            .set_option("threads", setup.thread_count);
        for (k, v) in &setup.options {
            builder = builder.set_option(k, v);
        }

        builder
            .build()
            .map_err(|e| Error::codec_open(&setup.codec, e))
    }

    fn to_frame(&self, native: &NativeAudio) -> AudioFrame {
        let parameters = self.encoder.codec_parameters();
        let mut frame = AudioFrameMut::silence(
            parameters.channel_layout(),
            parameters.sample_format(),
            parameters.sample_rate(),
            native.samples,
        );
        {
            let mut planes = frame.planes_mut();
            for (i, src) in native.planes.iter().enumerate().take(planes.len()) {
                let dst = planes[i].data_mut();
                let len = dst.len().min(src.len());
                dst[..len].copy_from_slice(&src[..len]);
            }
        }
        frame
            .with_pts(native_timestamp(native.pts, self.setup.time_base))
            .freeze()
    }
}

impl PacketEncoder for FfmpegAudioEncoder {
    fn parameters(&self) -> CodecParameters {
        let mut parameters = CodecParameters::audio(
            &self.setup.codec,
            self.setup.sample_rate,
            self.setup.channels,
            self.sample_format,
            self.setup.time_base,
        )
        .with_bit_rate(self.setup.bit_rate)
        .with_frame_size(self.frame_size());
        parameters.native = Some(NativeParameters(self.encoder.codec_parameters().into()));
        parameters
    }

    fn frame_size(&self) -> Option<usize> {
        self.encoder.samples_per_frame()
    }

    fn send_frame(&mut self, frame: &NativeFrame) -> Result<()> {
        let NativeFrame::Audio(native) = frame else {
            return Err(Error::Encode(String::from("video frame sent to an audio encoder")));
        };
        let frame = self.to_frame(native);
        self.encoder
            .try_push(frame)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.encoder
            .try_flush()
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        let packet = self
            .encoder
            .take()
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(packet.map(|p| from_native_packet(&p, self.setup.time_base)))
    }
}
