use crate::backend::MediaBackend;
use crate::convert::{AudioLayout, SampleConverter};
use crate::decoder::session::DecodeSession;
use crate::decoder::{AudioDecoderConfig, DecoderStatistics, StreamDecoder};
use crate::error::{Error, Result};
use crate::log_info;
use crate::logging::Logger;
use crate::media::{AudioFrame, MediaKind, NativeAudio, NativeFrame, StreamMetadata, TimeBase};
use std::path::Path;
use std::sync::Arc;

/// Decodes the first audio stream of a file into interleaved frames of the
/// configured sample layout.
pub struct AudioDecoder {
    config: AudioDecoderConfig,
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    // released before the session
    converter: Option<SampleConverter>,
    session: Option<DecodeSession>,
    next_index: u64,
    current_time: f64,
}

impl AudioDecoder {
    pub fn new(config: AudioDecoderConfig, backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            config,
            backend,
            log: log.with_target("upcast::decoder::audio"),
            converter: None,
            session: None,
            next_index: 0,
            current_time: 0.0,
        }
    }

    pub fn config(&self) -> &AudioDecoderConfig {
        &self.config
    }

    /// Layout of the frames this decoder delivers for a given source layout.
    pub fn output_layout(&self, source: AudioLayout) -> AudioLayout {
        let rate = match self.config.sample_rate {
            0 => source.sample_rate,
            rate => rate,
        };
        let channels = match self.config.channels {
            0 => source.channels,
            channels => channels,
        };
        AudioLayout::new(rate, channels, self.config.sample_format.packed())
    }

    /// Seek to sample `n` of the source stream.
    pub fn seek_to_sample(&mut self, n: u64) -> Result<()> {
        let rate = self
            .metadata()
            .map(|m| m.sample_rate)
            .filter(|r| *r > 0)
            .ok_or_else(|| Error::Seek(String::from("stream has no sample rate")))?;
        self.seek(n as f64 / rate as f64)
    }

    fn session(&mut self) -> Result<&mut DecodeSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("AudioDecoder", "read", "closed"))
    }

    fn convert(&mut self, native: &NativeAudio) -> Result<NativeAudio> {
        let source = AudioLayout::of(native);
        let target = self.output_layout(source);
        if source == target {
            return Ok(native.clone());
        }

        if self.converter.as_ref().map(|c| c.source()) != Some(source) {
            log_info!(self.log, "Converting {} -> {}", source, target);
            self.converter = Some(SampleConverter::new(source, target)?);
        }
        match self.converter.as_mut() {
            Some(converter) => converter.convert(native),
            None => Ok(native.clone()),
        }
    }
}

impl StreamDecoder for AudioDecoder {
    type Frame = AudioFrame;

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close();
        let session = DecodeSession::open(
            self.backend.as_ref(),
            path,
            MediaKind::Audio,
            self.config.thread_count,
            self.log.clone(),
        )?;
        let stream = session.stream();
        log_info!(
            self.log,
            "Audio: {} {}Hz {}ch, {:.3}s",
            stream.codec,
            stream.sample_rate,
            stream.channels,
            stream.duration.unwrap_or(0.0)
        );
        self.session = Some(session);
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<AudioFrame>> {
        let session = self.session()?;
        let Some(frame) = session.next_frame()? else {
            return Ok(None);
        };
        let NativeFrame::Audio(native) = frame else {
            return Err(Error::WrongFrameKind {
                expected: MediaKind::Audio,
                found: MediaKind::Video,
            });
        };

        let time_base = session.stream().time_base;
        let step = TimeBase::from_sample_rate(native.sample_rate)
            .rescale(native.samples as i64, time_base);
        let raw_pts = session.stamp(native.pts, step);
        let pts = session.seconds(raw_pts);

        let converted = self.convert(&native)?;
        let data = converted.planes.into_iter().next().unwrap_or_default();
        let index = self.next_index;
        self.next_index += 1;
        self.current_time = pts;

        Ok(Some(
            AudioFrame::new(
                data,
                converted.sample_rate,
                converted.channels,
                converted.samples,
                converted.format,
            )
            .with_timing(pts, raw_pts, index),
        ))
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.session()?.seek(seconds)?;
        if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }
        self.current_time = seconds;
        Ok(())
    }

    fn close(&mut self) {
        self.converter = None;
        if self.session.take().is_some() {
            log_info!(self.log, "Audio decoder closed");
        }
        self.next_index = 0;
        self.current_time = 0.0;
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn metadata(&self) -> Option<&StreamMetadata> {
        self.session.as_ref().map(|s| s.stream())
    }

    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn statistics(&self) -> DecoderStatistics {
        self.session
            .as_ref()
            .map(|s| s.statistics())
            .unwrap_or_default()
    }
}

impl Drop for AudioDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryInput};
    use crate::media::SampleFormat;

    fn keep_source() -> AudioDecoderConfig {
        AudioDecoderConfig {
            sample_rate: 0,
            channels: 0,
            ..AudioDecoderConfig::default()
        }
    }

    #[test]
    fn test_decodes_interleaved_s16() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "tone.raw",
            MemoryInput::builder().audio(8000, 2, 400, 5).build(),
        );
        let mut decoder = AudioDecoder::new(keep_source(), backend.clone(), Logger::default());
        decoder.open(Path::new("tone.raw")).unwrap();

        let frames = decoder.read_all().unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.samples, 400);
            assert_eq!(frame.channels, 2);
            assert_eq!(frame.format, SampleFormat::S16);
            assert_eq!(frame.data.len(), 400 * 2 * 2);
            assert!((frame.pts - i as f64 * 0.05).abs() < 1e-9);
            assert_eq!(frame.raw_pts, i as i64 * 400);
        }
    }

    #[test]
    fn test_planar_float_source_is_converted() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "float.raw",
            MemoryInput::builder()
                .audio(44_100, 1, 441, 4)
                .float_audio()
                .build(),
        );
        let mut decoder =
            AudioDecoder::new(AudioDecoderConfig::default(), backend.clone(), Logger::default());
        decoder.open(Path::new("float.raw")).unwrap();

        let frame = decoder.read_next().unwrap().unwrap();
        assert_eq!(frame.format, SampleFormat::S16);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.sample_rate, 44_100);
        assert_eq!(frame.data.len(), frame.samples * 4);
        assert_eq!(frame.samples, 441);
    }

    #[test]
    fn test_resampled_timestamps_follow_source() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("r.raw", MemoryInput::builder().audio(32_000, 1, 320, 10).build());
        let config = AudioDecoderConfig {
            sample_rate: 48_000,
            channels: 1,
            sample_format: SampleFormat::Flt,
            ..AudioDecoderConfig::default()
        };
        let mut decoder = AudioDecoder::new(config, backend.clone(), Logger::default());
        decoder.open(Path::new("r.raw")).unwrap();

        let frames = decoder.read_all().unwrap();
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|f| f.sample_rate == 48_000));
        for pair in frames.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
            assert!((pair[1].pts - pair[0].pts - 0.01).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seek_to_sample() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("s.raw", MemoryInput::builder().audio(1000, 1, 100, 10).build());
        let mut decoder = AudioDecoder::new(keep_source(), backend.clone(), Logger::default());
        decoder.open(Path::new("s.raw")).unwrap();

        decoder.seek_to_sample(450).unwrap();
        assert!((decoder.current_time() - 0.45).abs() < 1e-9);
        let frame = decoder.read_next().unwrap().unwrap();
        assert_eq!(frame.raw_pts, 400);
    }

    #[test]
    fn test_corrupt_audio_packet_is_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "c.raw",
            MemoryInput::builder()
                .audio(8000, 2, 80, 4)
                .corrupt(MediaKind::Audio, 0)
                .build(),
        );
        let mut decoder = AudioDecoder::new(keep_source(), backend.clone(), Logger::default());
        decoder.open(Path::new("c.raw")).unwrap();
        let frames = decoder.read_all().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].raw_pts, 80);
        assert_eq!(decoder.statistics().packets_skipped, 1);
    }
}
