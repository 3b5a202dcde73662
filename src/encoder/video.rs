use crate::backend::{MediaBackend, PacketEncoder, VideoEncoderSetup};
use crate::convert::{Geometry, PixelConverter};
use crate::encoder::{EncoderStatistics, FramePool, RateControl};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{
    CodecParameters, NativeFrame, NativeVideo, Packet, PixelFormat, TimeBase, VideoFrame,
};
use crate::pipeline::PipelineState;
use crate::{log_debug, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Video encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub rate_control: RateControl,
    /// 0x0 = take the size of the first frame.
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub preset: String,
    pub profile: String,
    pub pixel_format: PixelFormat,
    /// 0 = auto.
    pub thread_count: u32,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            codec: String::from("libx264"),
            rate_control: RateControl::default(),
            width: 0,
            height: 0,
            frame_rate: 30.0,
            gop_size: 30,
            max_b_frames: 1,
            preset: String::from("medium"),
            profile: String::from("high"),
            pixel_format: PixelFormat::Yuv420p,
            thread_count: 0,
        }
    }
}

impl VideoEncoderConfig {
    pub fn is_auto_size(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bitrate and codec options for the configured rate control.
    ///
    /// Bitrate mode sets `bit_rate`; quality mode leaves it unset and passes
    /// `crf` (plus `qp=0` for lossless) to x264/x265, `global_quality` to others.
    pub fn codec_options(&self) -> (Option<u64>, Vec<(String, String)>) {
        let x264 = self.codec == "libx264";
        let x265 = self.codec == "libx265";
        let mut options: Vec<(&str, String)> = Vec::new();

        if x264 || x265 {
            options.push(("preset", self.preset.clone()));
            // x265 only knows the main* profiles
            if x264 || self.profile.starts_with("main") {
                options.push(("profile", self.profile.clone()));
            }
        }

        let bit_rate = match self.rate_control {
            RateControl::Bitrate(bps) => {
                if x264 {
                    options.push(("tune", String::from("zerolatency")));
                }
                Some(bps)
            }
            RateControl::Quality(q) if x264 || x265 => {
                options.push(("crf", q.to_string()));
                if q == 0 {
                    options.push(("qp", String::from("0")));
                }
                None
            }
            RateControl::Quality(q) => {
                options.push(("global_quality", q.to_string()));
                None
            }
        };

        let options = options
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        (bit_rate, options)
    }
}

/// Encodes packed video frames.
pub struct VideoEncoder {
    config: VideoEncoderConfig,
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    state: PipelineState,
    time_base: TimeBase,
    /// Ticks between two frames in `time_base`.
    pts_step: i64,
    frame_count: i64,
    // released in this order: conversion, frame buffers, codec
    converter: Option<PixelConverter>,
    pool: Option<FramePool>,
    codec: Option<Box<dyn PacketEncoder>>,
    geometry: Option<Geometry>,
    packed: Vec<u8>,
    stats: EncoderStatistics,
}

impl VideoEncoder {
    pub fn new(backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            config: VideoEncoderConfig::default(),
            backend,
            log: log.with_target("upcast::encoder::video"),
            state: PipelineState::Uninitialized,
            time_base: TimeBase::default(),
            pts_step: 1,
            frame_count: 0,
            converter: None,
            pool: None,
            codec: None,
            geometry: None,
            packed: Vec::new(),
            stats: EncoderStatistics::default(),
        }
    }

    /// Resolve the codec and, unless the size is automatic, open it.
    ///
    /// `time_base` defaults to one tick per frame.
    pub fn init(&mut self, config: VideoEncoderConfig, time_base: Option<TimeBase>) -> Result<()> {
        if self.state != PipelineState::Uninitialized {
            return Err(Error::invalid_state("VideoEncoder", "init", self.state));
        }
        if !self.backend.has_encoder(&config.codec) {
            return Err(Error::CodecNotFound(config.codec));
        }
        if !(config.frame_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "frame rate must be positive, got {}",
                config.frame_rate
            )));
        }

        let time_base = time_base.unwrap_or_else(|| TimeBase::from_frame_rate(config.frame_rate));
        self.pts_step = time_base.from_seconds(1.0 / config.frame_rate).max(1);
        self.time_base = time_base;
        self.config = config;

        if !self.config.is_auto_size() {
            self.open_codec(self.config.width, self.config.height)?;
        } else {
            log_debug!(self.log, "{}: size taken from the first frame", self.config.codec);
        }
        self.state.transition(PipelineState::Running, "VideoEncoder", "init")
    }

    fn open_codec(&mut self, width: u32, height: u32) -> Result<()> {
        let format = self.config.pixel_format;
        // 4:2:0 layouts need even dimensions
        let (width, height) = match format {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => (width + width % 2, height + height % 2),
            _ => (width, height),
        };

        let (bit_rate, options) = self.config.codec_options();
        let setup = VideoEncoderSetup {
            codec: self.config.codec.clone(),
            width,
            height,
            pixel_format: format,
            time_base: self.time_base,
            frame_rate: self.config.frame_rate,
            bit_rate,
            gop_size: self.config.gop_size,
            max_b_frames: self.config.max_b_frames,
            thread_count: self.config.thread_count,
            options,
        };
        let codec = self.backend.open_video_encoder(&setup)?;

        log_info!(
            self.log,
            "Using encoder: {} {}x{} {} @ {} fps, {}",
            setup.codec,
            width,
            height,
            format,
            setup.frame_rate,
            self.config.rate_control
        );
        self.geometry = Some(Geometry::new(width, height, format));
        self.pool = Some(FramePool::new(width, height, format));
        self.packed = vec![0; format.buffer_size(width, height)];
        self.codec = Some(codec);
        Ok(())
    }

    /// Encode one frame; returns the packets the codec released (maybe none).
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<Packet>> {
        if !self.state.is_running() {
            return Err(Error::invalid_state("VideoEncoder", "encode", self.state));
        }
        if !frame.is_consistent() {
            return Err(Error::Encode(format!(
                "frame {} has {} bytes for {}x{} {}",
                frame.index,
                frame.size(),
                frame.width,
                frame.height,
                frame.format
            )));
        }
        if self.codec.is_none() {
            // auto-size: happens once, before any packet exists
            self.open_codec(frame.width, frame.height)?;
        }
        let target = self
            .geometry
            .ok_or_else(|| Error::invalid_state("VideoEncoder", "encode", "unopened"))?;

        let source = Geometry::new(frame.width, frame.height, frame.format);
        let data: &[u8] = if source == target {
            &frame.data
        } else {
            if self.converter.as_ref().map(|c| c.source()) != Some(source) {
                log_debug!(self.log, "Input {} -> encoder {}", source, target);
                self.converter = Some(PixelConverter::new(source, target)?);
            }
            if let Some(converter) = self.converter.as_ref() {
                converter.convert_into(&frame.data, &mut self.packed)?;
            }
            &self.packed
        };

        let mut native = match self.pool.as_mut() {
            Some(pool) => pool.take(),
            None => NativeVideo::blank(target.width, target.height, target.format),
        };
        native.fill_from_packed(data);
        // counter-based pts: constant frame rate regardless of input timing
        native.pts = Some(self.frame_count * self.pts_step);
        self.frame_count += 1;

        let started = Instant::now();
        let native = NativeFrame::Video(native);
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| Error::invalid_state("VideoEncoder", "encode", "unopened"))?;
        codec.send_frame(&native)?;
        let packets = Self::drain(codec.as_mut())?;
        self.stats.encode_time += started.elapsed();
        self.stats.frames_encoded += 1;

        if let (NativeFrame::Video(native), Some(pool)) = (native, self.pool.as_mut()) {
            pool.put(native);
        }
        Ok(self.count(packets))
    }

    /// Drain the codec. Must be called once before `close`.
    pub fn flush(&mut self) -> Result<Vec<Packet>> {
        self.state.transition(PipelineState::Flushed, "VideoEncoder", "flush")?;
        let Some(codec) = self.codec.as_mut() else {
            log_warn!(self.log, "Flushing an encoder that never received a frame");
            return Ok(Vec::new());
        };
        codec.send_eof()?;
        let packets = Self::drain(codec.as_mut())?;
        log_info!(self.log, "{}", self.stats);
        Ok(self.count(packets))
    }

    /// Release the conversion context, the frame buffers and the codec.
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.converter = None;
        self.pool = None;
        self.codec = None;
        self.state = PipelineState::Closed;
        log_debug!(self.log, "Video encoder closed");
    }

    /// Parameters of the opened codec, `None` until the codec is open.
    pub fn parameters(&self) -> Option<CodecParameters> {
        self.codec.as_ref().map(|c| c.parameters())
    }

    pub fn is_open(&self) -> bool {
        self.codec.is_some()
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &VideoEncoderConfig {
        &self.config
    }

    pub fn statistics(&self) -> EncoderStatistics {
        self.stats
    }

    fn drain(codec: &mut dyn PacketEncoder) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while let Some(packet) = codec.receive_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn count(&mut self, packets: Vec<Packet>) -> Vec<Packet> {
        self.stats.packets += packets.len() as u64;
        self.stats.bytes += packets.iter().map(|p| p.size() as u64).sum::<u64>();
        packets
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.close();
    }
}
