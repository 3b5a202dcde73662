use crate::backend::{AudioEncoderSetup, MediaBackend, PacketEncoder};
use crate::convert::audio::{read_samples, write_samples};
use crate::convert::{AudioLayout, SampleConverter};
use crate::encoder::EncoderStatistics;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{
    AudioFrame, CodecParameters, NativeAudio, NativeFrame, Packet, SampleFormat, TimeBase,
};
use crate::pipeline::PipelineState;
use crate::{log_debug, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Audio encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoderConfig {
    pub codec: String,
    /// Bits per second.
    pub bitrate: u64,
    /// 0 = take the rate of the first frame.
    pub sample_rate: u32,
    /// 0 = take the channel count of the first frame.
    pub channels: u16,
    /// Wrap decoded samples into packets without encoding.
    pub stream_copy: bool,
    pub thread_count: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            codec: String::from("aac"),
            bitrate: 128_000,
            sample_rate: 48_000,
            channels: 2,
            stream_copy: false,
            thread_count: 0,
        }
    }
}

/// Encodes interleaved audio frames, re-blocking them to the codec frame size.
pub struct AudioEncoder {
    config: AudioEncoderConfig,
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    state: PipelineState,
    requested_time_base: Option<TimeBase>,
    time_base: TimeBase,
    converter: Option<SampleConverter>,
    codec: Option<Box<dyn PacketEncoder>>,
    /// Codec input layout, set once the codec (or stream copy) is configured.
    layout: Option<AudioLayout>,
    frame_size: Option<usize>,
    /// Interleaved f32 samples waiting for a full codec frame.
    fifo: Vec<f32>,
    samples_sent: i64,
    copy_parameters: Option<CodecParameters>,
    stats: EncoderStatistics,
}

impl AudioEncoder {
    pub fn new(backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            config: AudioEncoderConfig::default(),
            backend,
            log: log.with_target("upcast::encoder::audio"),
            state: PipelineState::Uninitialized,
            requested_time_base: None,
            time_base: TimeBase::default(),
            converter: None,
            codec: None,
            layout: None,
            frame_size: None,
            fifo: Vec::new(),
            samples_sent: 0,
            copy_parameters: None,
            stats: EncoderStatistics::default(),
        }
    }

    /// Resolve the codec and open it when the layout is fully configured.
    ///
    /// `time_base` defaults to `1/sample_rate`.
    pub fn init(&mut self, config: AudioEncoderConfig, time_base: Option<TimeBase>) -> Result<()> {
        if self.state != PipelineState::Uninitialized {
            return Err(Error::invalid_state("AudioEncoder", "init", self.state));
        }
        if !config.stream_copy && !self.backend.has_encoder(&config.codec) {
            return Err(Error::CodecNotFound(config.codec));
        }
        self.requested_time_base = time_base;
        self.config = config;

        if self.config.sample_rate > 0 && self.config.channels > 0 {
            let layout = AudioLayout::new(
                self.config.sample_rate,
                self.config.channels,
                SampleFormat::S16,
            );
            self.configure(layout)?;
        }
        self.state.transition(PipelineState::Running, "AudioEncoder", "init")
    }

    fn configure(&mut self, layout: AudioLayout) -> Result<()> {
        self.time_base = self
            .requested_time_base
            .unwrap_or_else(|| TimeBase::from_sample_rate(layout.sample_rate));

        if self.config.stream_copy {
            let codec = match layout.format.packed() {
                SampleFormat::Flt => "pcm_f32le",
                _ => "pcm_s16le",
            };
            let layout = AudioLayout::new(layout.sample_rate, layout.channels, layout.format.packed());
            self.copy_parameters = Some(
                CodecParameters::audio(
                    codec,
                    layout.sample_rate,
                    layout.channels,
                    layout.format,
                    self.time_base,
                )
                .with_bit_rate(
                    layout.sample_rate as u64
                        * layout.channels as u64
                        * layout.format.bytes_per_sample() as u64
                        * 8,
                ),
            );
            self.layout = Some(layout);
            log_info!(self.log, "Audio stream copy: {}", layout);
            return Ok(());
        }

        let setup = AudioEncoderSetup {
            codec: self.config.codec.clone(),
            sample_rate: layout.sample_rate,
            channels: layout.channels,
            sample_format: SampleFormat::Fltp,
            time_base: self.time_base,
            bit_rate: self.config.bitrate,
            thread_count: self.config.thread_count,
            options: Vec::new(),
        };
        let codec = self.backend.open_audio_encoder(&setup)?;
        let params = codec.parameters();
        let format = params.sample_format.unwrap_or(SampleFormat::Fltp);

        log_info!(
            self.log,
            "Using encoder: {} {}Hz {}ch {} @ {} kb/s, frame size {:?}",
            setup.codec,
            layout.sample_rate,
            layout.channels,
            format,
            setup.bit_rate / 1000,
            codec.frame_size()
        );
        self.frame_size = codec.frame_size();
        self.layout = Some(AudioLayout::new(layout.sample_rate, layout.channels, format));
        self.codec = Some(codec);
        Ok(())
    }

    /// Encode one frame; returns the packets of every completed codec frame.
    pub fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<Packet>> {
        if !self.state.is_running() {
            return Err(Error::invalid_state("AudioEncoder", "encode", self.state));
        }
        if frame.format.is_planar() {
            return Err(Error::Encode(format!(
                "audio frame {} is planar ({}), expected interleaved samples",
                frame.index, frame.format
            )));
        }
        let expected = frame.samples * frame.channels as usize * frame.format.bytes_per_sample();
        if frame.data.len() != expected || frame.channels == 0 || frame.sample_rate == 0 {
            return Err(Error::Encode(format!(
                "audio frame {} has {} bytes for {} samples of {}Hz {}ch {}",
                frame.index,
                frame.size(),
                frame.samples,
                frame.sample_rate,
                frame.channels,
                frame.format
            )));
        }

        if self.layout.is_none() {
            let rate = match self.config.sample_rate {
                0 => frame.sample_rate,
                rate => rate,
            };
            let channels = match self.config.channels {
                0 => frame.channels,
                channels => channels,
            };
            self.configure(AudioLayout::new(rate, channels, frame.format))?;
        }

        self.stats.frames_encoded += 1;
        if self.config.stream_copy {
            return self.copy(frame);
        }

        let target = self.codec_layout()?;
        let source = AudioLayout::new(frame.sample_rate, frame.channels, frame.format);
        let native = NativeAudio::interleaved(
            frame.data.clone(),
            frame.sample_rate,
            frame.channels,
            frame.format,
        );
        let interleaved_target = AudioLayout::new(target.sample_rate, target.channels, SampleFormat::Flt);
        let samples = if source.sample_rate == target.sample_rate && source.channels == target.channels
        {
            read_samples(&native)
        } else {
            if self.converter.as_ref().map(|c| c.source()) != Some(source) {
                log_debug!(self.log, "Input {} -> encoder {}", source, target);
                self.converter = Some(SampleConverter::new(source, interleaved_target)?);
            }
            match self.converter.as_mut() {
                Some(converter) => read_samples(&converter.convert(&native)?),
                None => Vec::new(),
            }
        };
        self.fifo.extend_from_slice(&samples);

        let channels = target.channels as usize;
        let mut packets = Vec::new();
        match self.frame_size {
            Some(size) => {
                while self.fifo.len() >= size * channels {
                    let block: Vec<f32> = self.fifo.drain(..size * channels).collect();
                    packets.extend(self.send_block(&block, target)?);
                }
            }
            None if !self.fifo.is_empty() => {
                let block = std::mem::take(&mut self.fifo);
                packets.extend(self.send_block(&block, target)?);
            }
            None => {}
        }
        Ok(packets)
    }

    /// Emit the buffered partial block and drain the codec.
    pub fn flush(&mut self) -> Result<Vec<Packet>> {
        self.state.transition(PipelineState::Flushed, "AudioEncoder", "flush")?;
        if self.config.stream_copy {
            return Ok(Vec::new());
        }
        let Some(target) = self.layout else {
            log_warn!(self.log, "Flushing an encoder that never received a frame");
            return Ok(Vec::new());
        };

        let mut packets = Vec::new();
        if !self.fifo.is_empty() {
            let block = std::mem::take(&mut self.fifo);
            packets.extend(self.send_block(&block, target)?);
        }
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| Error::invalid_state("AudioEncoder", "flush", "unopened"))?;
        codec.send_eof()?;
        let mut drained = Vec::new();
        while let Some(packet) = codec.receive_packet()? {
            drained.push(packet);
        }
        packets.extend(self.count(drained));
        log_info!(self.log, "{}", self.stats);
        Ok(packets)
    }

    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.converter = None;
        self.fifo.clear();
        self.codec = None;
        self.state = PipelineState::Closed;
        log_debug!(self.log, "Audio encoder closed");
    }

    /// Parameters for the muxer, `None` until the layout is known.
    pub fn parameters(&self) -> Option<CodecParameters> {
        match &self.codec {
            Some(codec) => Some(codec.parameters()),
            None => self.copy_parameters.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.layout.is_some()
    }

    pub fn is_stream_copy(&self) -> bool {
        self.config.stream_copy
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    /// Samples waiting in the FIFO, per channel.
    pub fn buffered_samples(&self) -> usize {
        match self.layout {
            Some(layout) => self.fifo.len() / layout.channels.max(1) as usize,
            None => 0,
        }
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &AudioEncoderConfig {
        &self.config
    }

    pub fn statistics(&self) -> EncoderStatistics {
        self.stats
    }

    fn codec_layout(&self) -> Result<AudioLayout> {
        self.layout
            .ok_or_else(|| Error::invalid_state("AudioEncoder", "encode", "unopened"))
    }

    fn send_block(&mut self, block: &[f32], layout: AudioLayout) -> Result<Vec<Packet>> {
        let channels = layout.channels as usize;
        let samples = block.len() / channels;
        let pts = TimeBase::from_sample_rate(layout.sample_rate).rescale(self.samples_sent, self.time_base);
        let frame = NativeFrame::Audio(NativeAudio {
            sample_rate: layout.sample_rate,
            channels: layout.channels,
            samples,
            format: layout.format,
            planes: write_samples(block, channels, layout.format),
            pts: Some(pts),
        });
        self.samples_sent += samples as i64;

        let started = Instant::now();
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| Error::invalid_state("AudioEncoder", "encode", "unopened"))?;
        codec.send_frame(&frame)?;
        let mut packets = Vec::new();
        while let Some(packet) = codec.receive_packet()? {
            packets.push(packet);
        }
        self.stats.encode_time += started.elapsed();
        Ok(self.count(packets))
    }

    fn copy(&mut self, frame: &AudioFrame) -> Result<Vec<Packet>> {
        let layout = self.codec_layout()?;
        if frame.sample_rate != layout.sample_rate
            || frame.channels != layout.channels
            || frame.format != layout.format
        {
            return Err(Error::Encode(format!(
                "stream copy configured for {}, got {}Hz {}ch {}",
                layout, frame.sample_rate, frame.channels, frame.format
            )));
        }
        let samples_tb = TimeBase::from_sample_rate(layout.sample_rate);
        let pts = samples_tb.rescale(self.samples_sent, self.time_base);
        let duration = samples_tb.rescale(frame.samples as i64, self.time_base);
        self.samples_sent += frame.samples as i64;

        let packet = Packet::new(frame.data.clone(), self.time_base)
            .with_pts(pts)
            .with_dts(pts)
            .with_duration(duration)
            .with_key_flag(true);
        Ok(self.count(vec![packet]))
    }

    fn count(&mut self, packets: Vec<Packet>) -> Vec<Packet> {
        self.stats.packets += packets.len() as u64;
        self.stats.bytes += packets.iter().map(|p| p.size() as u64).sum::<u64>();
        packets
    }
}

impl Drop for AudioEncoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn frame(rate: u32, channels: u16, samples: usize, index: u64) -> AudioFrame {
        let data = vec![0u8; samples * channels as usize * 2];
        AudioFrame::new(data, rate, channels, samples, SampleFormat::S16).with_timing(
            (index * samples as u64) as f64 / rate as f64,
            0,
            index,
        )
    }

    fn encoder() -> AudioEncoder {
        AudioEncoder::new(Arc::new(MemoryBackend::new()), Logger::default())
    }

    #[test]
    fn test_reblocks_to_codec_frame_size() {
        let mut encoder = encoder();
        encoder.init(AudioEncoderConfig::default(), None).unwrap();
        assert_eq!(encoder.frame_size(), Some(1024));

        let mut packets = Vec::new();
        for i in 0..5 {
            packets.extend(encoder.encode(&frame(48_000, 2, 1000, i)).unwrap());
        }
        assert_eq!(packets.len(), 4);
        assert_eq!(encoder.buffered_samples(), 5000 - 4 * 1024);

        packets.extend(encoder.flush().unwrap());
        assert_eq!(packets.len(), 5);
        let pts: Vec<i64> = packets.iter().filter_map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 1024, 2048, 3072, 4096]);
        assert_eq!(packets.iter().map(|p| p.duration).sum::<i64>(), 5000);
        assert_eq!(encoder.time_base(), TimeBase::new(1, 48_000));
    }

    #[test]
    fn test_resampled_input_keeps_pts_monotonic() {
        let mut encoder = encoder();
        encoder.init(AudioEncoderConfig::default(), None).unwrap();

        let mut packets = Vec::new();
        for i in 0..10 {
            packets.extend(encoder.encode(&frame(44_100, 1, 441, i)).unwrap());
        }
        packets.extend(encoder.flush().unwrap());
        assert!(!packets.is_empty());
        assert!(packets.windows(2).all(|w| w[0].pts < w[1].pts));

        let params = encoder.parameters().unwrap();
        assert_eq!((params.sample_rate, params.channels), (48_000, 2));
    }

    #[test]
    fn test_layout_inferred_from_first_frame() {
        let mut encoder = encoder();
        let config = AudioEncoderConfig {
            codec: String::from("pcm_s16le"),
            sample_rate: 0,
            channels: 0,
            ..AudioEncoderConfig::default()
        };
        encoder.init(config, None).unwrap();
        assert!(encoder.parameters().is_none());

        let packets = encoder.encode(&frame(22_050, 1, 100, 0)).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].size(), 200);
        let params = encoder.parameters().unwrap();
        assert_eq!((params.sample_rate, params.channels), (22_050, 1));
    }

    #[test]
    fn test_stream_copy() {
        let mut encoder = encoder();
        let config = AudioEncoderConfig {
            codec: String::from("copy"),
            sample_rate: 44_100,
            channels: 2,
            stream_copy: true,
            ..AudioEncoderConfig::default()
        };
        encoder.init(config, None).unwrap();
        assert_eq!(encoder.parameters().unwrap().codec, "pcm_s16le");

        let first = encoder.encode(&frame(44_100, 2, 441, 0)).unwrap();
        let second = encoder.encode(&frame(44_100, 2, 441, 1)).unwrap();
        assert_eq!(first[0].data.len(), 441 * 4);
        assert_eq!((first[0].pts, second[0].pts), (Some(0), Some(441)));
        assert!(encoder.flush().unwrap().is_empty());

        // another layout cannot be copied
        let mut encoder = self::encoder();
        encoder
            .init(
                AudioEncoderConfig {
                    stream_copy: true,
                    ..AudioEncoderConfig::default()
                },
                None,
            )
            .unwrap();
        assert!(matches!(
            encoder.encode(&frame(44_100, 2, 10, 0)),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn test_invalid_input_and_lifecycle() {
        let mut encoder = encoder();
        let config = AudioEncoderConfig {
            codec: String::from("vorbis_magic"),
            ..AudioEncoderConfig::default()
        };
        assert!(matches!(
            encoder.init(config, None),
            Err(Error::CodecNotFound(_))
        ));

        encoder.init(AudioEncoderConfig::default(), None).unwrap();
        let mut broken = frame(48_000, 2, 10, 0);
        broken.data.pop();
        assert!(matches!(encoder.encode(&broken), Err(Error::Encode(_))));

        encoder.flush().unwrap();
        assert!(matches!(
            encoder.encode(&frame(48_000, 2, 10, 1)),
            Err(Error::InvalidState { .. })
        ));
        encoder.close();
        encoder.close();
        assert_eq!(encoder.state(), PipelineState::Closed);
    }
}
