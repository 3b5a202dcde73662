//! In-process backend with synthetic inputs and recorded outputs.
//!
//! Inputs are registered under a path and carry raw video (`rawvideo`) and PCM
//! audio (`pcm_s16le` / `pcm_f32le`) packets generated on the fly. Encoders
//! mimic the behavior the pipeline has to cope with (reorder delay, fixed
//! audio frame sizes, even-dimension requirements) and writers record every
//! header/packet/trailer call so tests can inspect the muxing order.

use crate::backend::{
    AudioEncoderSetup, ContainerWriter, InputContainer, MediaBackend, PacketDecoder,
    PacketEncoder, VideoEncoderSetup,
};
use crate::error::{Error, Result};
use crate::media::{
    CodecParameters, MediaKind, NativeAudio, NativeFrame, NativeVideo, Packet, PixelFormat, Plane,
    SampleFormat, StreamMetadata, TimeBase,
};
use crate::muxer::MuxerConfig;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const VIDEO_ENCODERS: &[&str] = &["rawvideo", "libx264", "libx265", "mpeg4"];

/// Audio encoders with their fixed frame size and native sample layout.
const AUDIO_ENCODERS: &[(&str, Option<usize>, SampleFormat)] = &[
    ("aac", Some(1024), SampleFormat::Fltp),
    ("libmp3lame", Some(1152), SampleFormat::Fltp),
    ("pcm_s16le", None, SampleFormat::S16),
    ("pcm_f32le", None, SampleFormat::Flt),
];

const FORMATS: &[&str] = &["mp4", "mov", "matroska", "nut", "avi"];

/// Timebase of synthetic video streams.
const VIDEO_TIME_BASE: TimeBase = TimeBase::new(1, 90_000);

/// Row alignment of decoded video planes, so stride handling is exercised.
const STRIDE_ALIGN: usize = 32;

pub struct MemoryBackend {
    inputs: Mutex<HashMap<PathBuf, MemoryInput>>,
    outputs: Mutex<HashMap<PathBuf, MemoryOutput>>,
    decoder_delay: usize,
    encoder_delay: usize,
    write_limit: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            decoder_delay: 0,
            encoder_delay: 0,
            write_limit: None,
        }
    }

    /// Frames decoders hold back until more input (or end of stream) arrives.
    pub fn with_decoder_delay(mut self, frames: usize) -> Self {
        self.decoder_delay = frames;
        self
    }

    /// Frames compressing video encoders buffer when B-frames are enabled.
    pub fn with_encoder_delay(mut self, frames: usize) -> Self {
        self.encoder_delay = frames;
        self
    }

    /// Make writers fail after `packets` packets.
    pub fn with_write_limit(mut self, packets: usize) -> Self {
        self.write_limit = Some(packets);
        self
    }

    pub fn add_input(&self, path: impl Into<PathBuf>, input: MemoryInput) {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), input);
    }

    /// Recorder of the last writer created for `path`.
    pub fn output(&self, path: impl AsRef<Path>) -> Option<MemoryOutput> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .cloned()
    }

    fn audio_encoder(codec: &str) -> Option<(Option<usize>, SampleFormat)> {
        AUDIO_ENCODERS
            .iter()
            .find(|(name, _, _)| *name == codec)
            .map(|(_, frame_size, format)| (*frame_size, *format))
    }

    fn container_time_base(format: &str, params: &CodecParameters) -> TimeBase {
        match format {
            "mp4" | "mov" if params.is_video() => TimeBase::new(1, 90_000),
            "mp4" | "mov" => TimeBase::from_sample_rate(params.sample_rate),
            "matroska" => TimeBase::new(1, 1000),
            _ => params.time_base,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_input(&self, path: &Path) -> Result<Box<dyn InputContainer>> {
        let input = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::open(path.display(), "No such file or directory"))?;
        Ok(Box::new(MemoryDemuxer { input, cursor: 0 }))
    }

    fn open_decoder(
        &self,
        stream: &StreamMetadata,
        _thread_count: u32,
    ) -> Result<Box<dyn PacketDecoder>> {
        let layout = match stream.codec.as_str() {
            "rawvideo" => {
                let format = stream
                    .format_name
                    .as_deref()
                    .and_then(PixelFormat::from_name)
                    .ok_or_else(|| Error::CodecUnsupported(String::from("rawvideo")))?;
                RawLayout::Video(format)
            }
            "pcm_s16le" => RawLayout::Audio(SampleFormat::S16),
            "pcm_f32le" => RawLayout::Audio(SampleFormat::Fltp),
            other => return Err(Error::CodecUnsupported(other.to_string())),
        };
        Ok(Box::new(MemoryDecoder {
            stream: stream.clone(),
            layout,
            queue: VecDeque::new(),
            delay: self.decoder_delay,
            eof: false,
        }))
    }

    fn open_video_encoder(&self, setup: &VideoEncoderSetup) -> Result<Box<dyn PacketEncoder>> {
        if !VIDEO_ENCODERS.contains(&setup.codec.as_str()) {
            return Err(Error::CodecNotFound(setup.codec.clone()));
        }
        if setup.width == 0 || setup.height == 0 {
            return Err(Error::codec_open(
                &setup.codec,
                format!("invalid dimensions {}x{}", setup.width, setup.height),
            ));
        }
        let raw = setup.codec == "rawvideo";
        if !raw && (setup.width % 2 != 0 || setup.height % 2 != 0) {
            return Err(Error::codec_open(
                &setup.codec,
                format!("{}x{} is not divisible by 2", setup.width, setup.height),
            ));
        }

        let params = CodecParameters::video(
            &setup.codec,
            setup.width,
            setup.height,
            setup.pixel_format,
            setup.time_base,
        )
        .with_bit_rate(setup.bit_rate.unwrap_or(0));

        Ok(Box::new(MemoryEncoder {
            params,
            raw,
            delay: if raw || setup.max_b_frames == 0 {
                0
            } else {
                self.encoder_delay
            },
            gop: setup.gop_size.max(1) as u64,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            received: 0,
            emitted: 0,
            short_frame_seen: false,
        }))
    }

    fn open_audio_encoder(&self, setup: &AudioEncoderSetup) -> Result<Box<dyn PacketEncoder>> {
        let (frame_size, format) = Self::audio_encoder(&setup.codec)
            .ok_or_else(|| Error::CodecNotFound(setup.codec.clone()))?;
        if setup.sample_rate == 0 || setup.channels == 0 {
            return Err(Error::codec_open(
                &setup.codec,
                format!("{}Hz / {} channels", setup.sample_rate, setup.channels),
            ));
        }
        let params = CodecParameters::audio(
            &setup.codec,
            setup.sample_rate,
            setup.channels,
            format,
            setup.time_base,
        )
        .with_bit_rate(setup.bit_rate)
        .with_frame_size(frame_size);

        Ok(Box::new(MemoryEncoder {
            raw: setup.codec.starts_with("pcm_"),
            params,
            delay: 0,
            gop: 1,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            received: 0,
            emitted: 0,
            short_frame_seen: false,
        }))
    }

    fn create_writer(&self, config: &MuxerConfig) -> Result<Box<dyn ContainerWriter>> {
        let format = config
            .format_name()
            .filter(|f| self.has_format(f))
            .ok_or_else(|| Error::CodecNotFound(config.describe_format()))?;

        let output = MemoryOutput::default();
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.output_path.clone(), output.clone());

        Ok(Box::new(MemoryWriter {
            format,
            fast_start: config.fast_start,
            output,
            streams: 0,
            written: 0,
            write_limit: self.write_limit,
        }))
    }

    fn has_encoder(&self, codec: &str) -> bool {
        VIDEO_ENCODERS.contains(&codec) || Self::audio_encoder(codec).is_some()
    }

    fn has_format(&self, format: &str) -> bool {
        FORMATS.contains(&format)
    }

    fn encoders(&self) -> Vec<String> {
        VIDEO_ENCODERS
            .iter()
            .copied()
            .chain(AUDIO_ENCODERS.iter().map(|(name, _, _)| *name))
            .map(String::from)
            .collect()
    }
}

/// A synthetic input file.
#[derive(Debug, Clone)]
pub struct MemoryInput {
    streams: Vec<StreamMetadata>,
    packets: Vec<Packet>,
    seekable: bool,
}

impl MemoryInput {
    pub fn builder() -> MemoryInputBuilder {
        MemoryInputBuilder::default()
    }

    pub fn streams(&self) -> &[StreamMetadata] {
        &self.streams
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }
}

#[derive(Debug, Clone)]
struct SyntheticVideo {
    width: u32,
    height: u32,
    fps: u32,
    frames: usize,
    format: PixelFormat,
}

#[derive(Debug, Clone)]
struct SyntheticAudio {
    sample_rate: u32,
    channels: u16,
    samples_per_packet: usize,
    packets: usize,
    codec: &'static str,
}

#[derive(Debug, Clone)]
pub struct MemoryInputBuilder {
    video: Option<SyntheticVideo>,
    audio: Option<SyntheticAudio>,
    corrupt: Vec<(MediaKind, usize)>,
    seekable: bool,
    video_pts: bool,
}

impl Default for MemoryInputBuilder {
    fn default() -> Self {
        Self {
            video: None,
            audio: None,
            corrupt: Vec::new(),
            seekable: true,
            video_pts: true,
        }
    }
}

impl MemoryInputBuilder {
    /// Raw yuv420p video stream.
    pub fn video(mut self, width: u32, height: u32, fps: u32, frames: usize) -> Self {
        self.video = Some(SyntheticVideo {
            width,
            height,
            fps: fps.max(1),
            frames,
            format: PixelFormat::Yuv420p,
        });
        self
    }

    pub fn video_format(mut self, format: PixelFormat) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.format = format;
        }
        self
    }

    /// Interleaved s16 PCM stream.
    pub fn audio(
        mut self,
        sample_rate: u32,
        channels: u16,
        samples_per_packet: usize,
        packets: usize,
    ) -> Self {
        self.audio = Some(SyntheticAudio {
            sample_rate,
            channels,
            samples_per_packet,
            packets,
            codec: "pcm_s16le",
        });
        self
    }

    /// Switch the audio stream to f32 PCM, decoded as planar floats.
    pub fn float_audio(mut self) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.codec = "pcm_f32le";
        }
        self
    }

    /// Truncate the `index`-th packet of the given stream.
    pub fn corrupt(mut self, kind: MediaKind, index: usize) -> Self {
        self.corrupt.push((kind, index));
        self
    }

    pub fn unseekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    /// Emit video packets without timestamps.
    pub fn without_video_pts(mut self) -> Self {
        self.video_pts = false;
        self
    }

    pub fn build(self) -> MemoryInput {
        let mut streams = Vec::new();
        let mut video_packets = Vec::new();
        let mut audio_packets = Vec::new();

        if let Some(video) = &self.video {
            let index = streams.len();
            let frame_tb = TimeBase::new(1, video.fps as i32);
            let mut meta = StreamMetadata::video(
                index,
                "rawvideo",
                VIDEO_TIME_BASE,
                video.width,
                video.height,
            );
            meta.start_time = Some(0);
            meta.duration = Some(video.frames as f64 / video.fps as f64);
            meta.frame_count = Some(video.frames as u64);
            meta.frame_rate = Some(video.fps as f64);
            meta.format_name = Some(video.format.name().to_string());
            streams.push(meta);

            for i in 0..video.frames {
                let pts = frame_tb.rescale(i as i64, VIDEO_TIME_BASE);
                let mut data = synthetic_picture(video.width, video.height, video.format, i);
                if self.corrupt.contains(&(MediaKind::Video, i)) {
                    data.truncate(data.len() / 2);
                }
                let mut packet = Packet::new(data, VIDEO_TIME_BASE)
                    .with_stream_index(index)
                    .with_duration(frame_tb.rescale(1, VIDEO_TIME_BASE))
                    .with_key_flag(true);
                if self.video_pts {
                    packet = packet.with_pts(pts).with_dts(pts);
                }
                video_packets.push((i as f64 / video.fps as f64, packet));
            }
        }

        if let Some(audio) = &self.audio {
            let index = streams.len();
            let tb = TimeBase::from_sample_rate(audio.sample_rate);
            let mut meta =
                StreamMetadata::audio(index, audio.codec, tb, audio.sample_rate, audio.channels);
            let total = (audio.samples_per_packet * audio.packets) as u64;
            meta.start_time = Some(0);
            meta.duration = Some(total as f64 / audio.sample_rate as f64);
            meta.frame_count = Some(total);
            meta.format_name = Some(String::from(if audio.codec == "pcm_f32le" {
                "flt"
            } else {
                "s16"
            }));
            streams.push(meta);

            for i in 0..audio.packets {
                let first = i * audio.samples_per_packet;
                let mut data = synthetic_tone(audio, first);
                if self.corrupt.contains(&(MediaKind::Audio, i)) {
                    data.truncate(data.len() / 2 + 1);
                }
                let pts = first as i64;
                audio_packets.push((
                    tb.to_seconds(pts),
                    Packet::new(data, tb)
                        .with_stream_index(index)
                        .with_pts(pts)
                        .with_dts(pts)
                        .with_duration(audio.samples_per_packet as i64)
                        .with_key_flag(true),
                ));
            }
        }

        // container order: by time, video first on ties
        let mut packets = Vec::with_capacity(video_packets.len() + audio_packets.len());
        let mut video = video_packets.into_iter().peekable();
        let mut audio = audio_packets.into_iter().peekable();
        loop {
            let take_video = match (video.peek(), audio.peek()) {
                (Some((v, _)), Some((a, _))) => v <= a,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_video { video.next() } else { audio.next() };
            if let Some((_, packet)) = next {
                packets.push(packet);
            }
        }

        MemoryInput {
            streams,
            packets,
            seekable: self.seekable,
        }
    }
}

/// Moving gradient; the frame index shifts the luma pattern.
fn synthetic_picture(width: u32, height: u32, format: PixelFormat, index: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(format.buffer_size(width, height));
    for (plane, (row, rows)) in format.planes(width, height).into_iter().enumerate() {
        for y in 0..rows {
            for x in 0..row {
                let value = if plane == 0 {
                    (x + y + index * 4) % 256
                } else {
                    128
                };
                data.push(value as u8);
            }
        }
    }
    data
}

/// 440Hz tone starting at sample `first`.
fn synthetic_tone(audio: &SyntheticAudio, first: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for n in first..first + audio.samples_per_packet {
        let t = n as f32 / audio.sample_rate as f32;
        let value = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
        for _ in 0..audio.channels {
            if audio.codec == "pcm_f32le" {
                data.extend_from_slice(&value.to_le_bytes());
            } else {
                data.extend_from_slice(&((value * 32767.0) as i16).to_le_bytes());
            }
        }
    }
    data
}

struct MemoryDemuxer {
    input: MemoryInput,
    cursor: usize,
}

impl InputContainer for MemoryDemuxer {
    fn streams(&self) -> &[StreamMetadata] {
        &self.input.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = self.input.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64) -> Result<()> {
        if !self.input.seekable {
            return Err(Error::Seek(String::from("input is not seekable")));
        }
        let positions = self
            .input
            .packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.stream_index == stream_index);

        let mut target = None;
        for (position, packet) in positions {
            let Some(pts) = packet.pts else {
                return Err(Error::Seek(String::from("stream has no timestamps")));
            };
            // every synthetic packet is a key frame
            if target.is_none() || pts <= timestamp {
                target = Some(position);
            }
            if pts > timestamp {
                break;
            }
        }
        self.cursor = target.ok_or_else(|| Error::Seek(format!("no stream {}", stream_index)))?;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.input.seekable
    }
}

enum RawLayout {
    Video(PixelFormat),
    Audio(SampleFormat),
}

struct MemoryDecoder {
    stream: StreamMetadata,
    layout: RawLayout,
    queue: VecDeque<NativeFrame>,
    delay: usize,
    eof: bool,
}

impl PacketDecoder for MemoryDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = match self.layout {
            RawLayout::Video(format) => {
                let (width, height) = (self.stream.width, self.stream.height);
                let expected = format.buffer_size(width, height);
                if packet.data.len() != expected {
                    return Err(Error::Decode(format!(
                        "rawvideo packet has {} bytes, expected {}",
                        packet.data.len(),
                        expected
                    )));
                }
                let mut frame = NativeVideo::blank(width, height, format);
                for (plane, (row, rows)) in frame.planes.iter_mut().zip(format.planes(width, height)) {
                    let stride = row.next_multiple_of(STRIDE_ALIGN);
                    *plane = Plane {
                        data: vec![0; stride * rows],
                        stride,
                    };
                }
                frame.fill_from_packed(&packet.data);
                frame.pts = packet.pts;
                NativeFrame::Video(frame)
            }
            RawLayout::Audio(format) => {
                let channels = self.stream.channels.max(1) as usize;
                let frame_bytes = format.bytes_per_sample() * channels;
                if packet.data.is_empty() || packet.data.len() % frame_bytes != 0 {
                    return Err(Error::Decode(format!(
                        "pcm packet of {} bytes is not a whole number of frames",
                        packet.data.len()
                    )));
                }
                let mut frame = NativeAudio::interleaved(
                    packet.data.to_vec(),
                    self.stream.sample_rate,
                    self.stream.channels,
                    format.packed(),
                )
                .with_pts(packet.pts);
                if format.is_planar() {
                    frame.planes = deinterleave(&packet.data, channels, format.bytes_per_sample());
                    frame.format = format;
                }
                NativeFrame::Audio(frame)
            }
        };
        self.queue.push_back(frame);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<NativeFrame>> {
        if self.queue.len() > self.delay || self.eof {
            return Ok(self.queue.pop_front());
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.queue.clear();
        self.eof = false;
        Ok(())
    }
}

fn deinterleave(data: &[u8], channels: usize, sample_size: usize) -> Vec<Vec<u8>> {
    let mut planes = vec![Vec::with_capacity(data.len() / channels); channels];
    for frame in data.chunks_exact(channels * sample_size) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(sample_size)) {
            plane.extend_from_slice(sample);
        }
    }
    planes
}

struct MemoryEncoder {
    params: CodecParameters,
    raw: bool,
    delay: usize,
    gop: u64,
    held: VecDeque<Packet>,
    ready: VecDeque<Packet>,
    received: u64,
    emitted: u64,
    short_frame_seen: bool,
}

impl MemoryEncoder {
    fn video_packet(&self, frame: &NativeVideo) -> Result<Packet> {
        let params = &self.params;
        if frame.width != params.width
            || frame.height != params.height
            || Some(frame.format) != params.pixel_format
        {
            return Err(Error::Encode(format!(
                "encoder opened for {}x{}, got a {}x{} {} frame",
                params.width, params.height, frame.width, frame.height, frame.format
            )));
        }
        let pts = frame
            .pts
            .ok_or_else(|| Error::Encode(String::from("frame without pts")))?;

        let packed = frame.to_packed();
        let data = if self.raw {
            Bytes::from(packed)
        } else {
            // stand-in bitstream: a short prefix of the picture plus the pts
            let mut data = packed[..packed.len().min(64)].to_vec();
            data.extend_from_slice(&pts.to_le_bytes());
            Bytes::from(data)
        };
        Ok(Packet::new(data, params.time_base)
            .with_pts(pts)
            .with_duration(1)
            .with_key_flag(self.received % self.gop == 0))
    }

    fn audio_packet(&mut self, frame: &NativeAudio) -> Result<Packet> {
        let params = &self.params;
        if frame.sample_rate != params.sample_rate
            || frame.channels != params.channels
            || Some(frame.format) != params.sample_format
        {
            return Err(Error::Encode(format!(
                "encoder opened for {}Hz {}ch {:?}, got {}Hz {}ch {}",
                params.sample_rate,
                params.channels,
                params.sample_format,
                frame.sample_rate,
                frame.channels,
                frame.format
            )));
        }
        if let Some(size) = params.frame_size {
            if self.short_frame_seen || frame.samples > size {
                return Err(Error::Encode(format!(
                    "{} expects frames of {} samples, got {}",
                    params.codec, size, frame.samples
                )));
            }
            self.short_frame_seen = frame.samples < size;
        }
        let pts = frame
            .pts
            .ok_or_else(|| Error::Encode(String::from("frame without pts")))?;

        let data = if self.raw {
            frame.planes.concat()
        } else {
            (frame.samples as u32).to_le_bytes().to_vec()
        };
        Ok(Packet::new(data, self.params.time_base)
            .with_pts(pts)
            .with_dts(pts)
            .with_duration(frame.samples as i64)
            .with_key_flag(true))
    }

    fn release(&mut self, mut packet: Packet) {
        if packet.dts.is_none() {
            packet.dts = Some(self.emitted as i64 - self.delay as i64);
        }
        self.emitted += 1;
        self.ready.push_back(packet);
    }
}

impl PacketEncoder for MemoryEncoder {
    fn parameters(&self) -> CodecParameters {
        self.params.clone()
    }

    fn frame_size(&self) -> Option<usize> {
        self.params.frame_size
    }

    fn send_frame(&mut self, frame: &NativeFrame) -> Result<()> {
        let packet = match (frame, self.params.kind) {
            (NativeFrame::Video(video), MediaKind::Video) => self.video_packet(video)?,
            (NativeFrame::Audio(audio), MediaKind::Audio) => self.audio_packet(audio)?,
            _ => {
                return Err(Error::Encode(format!(
                    "{} encoder cannot take this frame",
                    self.params.codec
                )));
            }
        };
        self.received += 1;
        self.held.push_back(packet);
        while self.held.len() > self.delay {
            if let Some(packet) = self.held.pop_front() {
                self.release(packet);
            }
        }
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        while let Some(packet) = self.held.pop_front() {
            self.release(packet);
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.ready.pop_front())
    }
}

/// One recorded writer call.
#[derive(Debug, Clone)]
pub enum MuxEvent {
    Header {
        format: String,
        fast_start: bool,
        streams: Vec<CodecParameters>,
        time_bases: Vec<TimeBase>,
    },
    Packet(Packet),
    Trailer,
}

/// Shared recorder of a writer's calls.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    events: Arc<Mutex<Vec<MuxEvent>>>,
}

impl MemoryOutput {
    pub fn events(&self) -> Vec<MuxEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MuxEvent::Packet(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }

    pub fn header_count(&self) -> usize {
        self.count(|e| matches!(e, MuxEvent::Header { .. }))
    }

    pub fn trailer_count(&self) -> usize {
        self.count(|e| matches!(e, MuxEvent::Trailer))
    }

    /// Streams declared in the header.
    pub fn streams(&self) -> Vec<CodecParameters> {
        self.events()
            .into_iter()
            .find_map(|event| match event {
                MuxEvent::Header { streams, .. } => Some(streams),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn count(&self, predicate: impl Fn(&MuxEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    fn push(&self, event: MuxEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

struct MemoryWriter {
    format: String,
    fast_start: bool,
    output: MemoryOutput,
    streams: usize,
    written: usize,
    write_limit: Option<usize>,
}

impl ContainerWriter for MemoryWriter {
    fn write_header(&mut self, streams: &[CodecParameters]) -> Result<Vec<TimeBase>> {
        if streams.is_empty() {
            return Err(Error::Write(String::from("no streams to write")));
        }
        let time_bases: Vec<TimeBase> = streams
            .iter()
            .map(|params| MemoryBackend::container_time_base(&self.format, params))
            .collect();
        self.streams = streams.len();
        self.output.push(MuxEvent::Header {
            format: self.format.clone(),
            fast_start: self.fast_start,
            streams: streams.to_vec(),
            time_bases: time_bases.clone(),
        });
        Ok(time_bases)
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.write_limit.is_some_and(|limit| self.written >= limit) {
            return Err(Error::Write(String::from("No space left on device")));
        }
        if packet.stream_index >= self.streams {
            return Err(Error::Write(format!(
                "packet for undeclared stream {}",
                packet.stream_index
            )));
        }
        self.written += 1;
        self.output.push(MuxEvent::Packet(packet.clone()));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.output.push(MuxEvent::Trailer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_interleaves_by_time() {
        let input = MemoryInput::builder()
            .video(4, 4, 10, 3)
            .audio(1000, 1, 50, 6)
            .build();
        assert_eq!(input.streams().len(), 2);
        assert_eq!(input.packet_count(), 9);

        let order: Vec<usize> = input.packets.iter().map(|p| p.stream_index).collect();
        // video at 0.0/0.1/0.2, audio every 0.05s; video wins ties
        assert_eq!(order, vec![0, 1, 1, 0, 1, 1, 0, 1, 1]);
    }

    #[test]
    fn test_decoder_pads_rows() {
        let backend = MemoryBackend::new();
        backend.add_input("a.raw", MemoryInput::builder().video(6, 2, 30, 1).build());
        let mut input = backend.open_input(Path::new("a.raw")).unwrap();
        let stream = input.streams()[0].clone();
        let mut decoder = backend.open_decoder(&stream, 0).unwrap();

        let packet = input.read_packet().unwrap().unwrap();
        decoder.send_packet(&packet).unwrap();
        let Some(NativeFrame::Video(frame)) = decoder.receive_frame().unwrap() else {
            panic!("expected a video frame");
        };
        assert_eq!(frame.planes[0].stride, 32);
        assert_eq!(frame.to_packed(), packet.data.to_vec());
    }

    #[test]
    fn test_corrupt_packet_fails_decode() {
        let backend = MemoryBackend::new();
        backend.add_input(
            "c.raw",
            MemoryInput::builder()
                .video(4, 4, 30, 2)
                .corrupt(MediaKind::Video, 1)
                .build(),
        );
        let mut input = backend.open_input(Path::new("c.raw")).unwrap();
        let mut decoder = backend.open_decoder(&input.streams()[0].clone(), 0).unwrap();
        let first = input.read_packet().unwrap().unwrap();
        let second = input.read_packet().unwrap().unwrap();
        assert!(decoder.send_packet(&first).is_ok());
        assert!(matches!(decoder.send_packet(&second), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_codecs_and_formats() {
        let backend = MemoryBackend::new();
        let setup = AudioEncoderSetup {
            codec: String::from("vorbis-ng"),
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::Fltp,
            time_base: TimeBase::from_sample_rate(48_000),
            bit_rate: 128_000,
            thread_count: 0,
            options: Vec::new(),
        };
        assert!(matches!(
            backend.open_audio_encoder(&setup),
            Err(Error::CodecNotFound(_))
        ));
        assert!(backend.open_input(Path::new("missing.mp4")).is_err());
        assert!(backend.has_format("mp4"));
        assert!(!backend.has_format("webm"));
        assert!(backend.has_encoder("libx264"));
    }

    #[test]
    fn test_seek_lands_on_frame_at_or_before() {
        let backend = MemoryBackend::new();
        backend.add_input("s.raw", MemoryInput::builder().video(2, 2, 10, 10).build());
        let mut input = backend.open_input(Path::new("s.raw")).unwrap();
        // 0.55s in 1/90000 falls between frames 5 and 6
        input.seek(0, 49_500).unwrap();
        let packet = input.read_packet().unwrap().unwrap();
        assert_eq!(packet.pts, Some(45_000));
    }
}
