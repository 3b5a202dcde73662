use crate::backend::MediaBackend;
use crate::convert::{Geometry, PixelConverter};
use crate::decoder::session::DecodeSession;
use crate::decoder::{DecoderStatistics, StreamDecoder, VideoDecoderConfig};
use crate::error::{Error, Result};
use crate::log_info;
use crate::logging::Logger;
use crate::media::{MediaKind, NativeFrame, NativeVideo, StreamMetadata, VideoFrame};
use std::path::Path;
use std::sync::Arc;

/// Fallback frame rate for streams that do not declare one.
const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Decodes the first video stream of a file into packed frames of the
/// configured pixel format.
pub struct VideoDecoder {
    config: VideoDecoderConfig,
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    // released before the session
    converter: Option<PixelConverter>,
    session: Option<DecodeSession>,
    next_index: u64,
    current_time: f64,
}

impl VideoDecoder {
    pub fn new(config: VideoDecoderConfig, backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            config,
            backend,
            log: log.with_target("upcast::decoder::video"),
            converter: None,
            session: None,
            next_index: 0,
            current_time: 0.0,
        }
    }

    pub fn config(&self) -> &VideoDecoderConfig {
        &self.config
    }

    /// Frame rate of the open stream.
    pub fn frame_rate(&self) -> Option<f64> {
        self.metadata()
            .and_then(|m| m.frame_rate)
            .filter(|fps| *fps > 0.0)
    }

    /// Seek to frame `n`, i.e. `n / frame_rate` seconds.
    pub fn seek_to_frame(&mut self, n: u64) -> Result<()> {
        let fps = self
            .frame_rate()
            .ok_or_else(|| Error::Seek(String::from("stream has no frame rate")))?;
        self.seek(n as f64 / fps)
    }

    /// Output size for a `width`x`height` source under the configured limits.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        fit_within(width, height, self.config.max_width, self.config.max_height)
    }

    fn session(&mut self) -> Result<&mut DecodeSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("VideoDecoder", "read", "closed"))
    }

    /// Pack (and convert if needed) a native frame into the output layout.
    fn convert(&mut self, native: &NativeVideo) -> Result<(Vec<u8>, u32, u32)> {
        let source = Geometry::new(native.width, native.height, native.format);
        let (width, height) = self.output_size(native.width, native.height);
        let target = Geometry::new(width, height, self.config.pixel_format);

        let packed = native.to_packed();
        if source == target {
            return Ok((packed, width, height));
        }

        // rebuilt only when the source geometry changes
        if self.converter.as_ref().map(|c| c.source()) != Some(source) {
            log_info!(self.log, "Converting {} -> {}", source, target);
            self.converter = Some(PixelConverter::new(source, target)?);
        }
        let Some(converter) = self.converter.as_ref() else {
            return Ok((packed, width, height));
        };
        Ok((converter.convert(&packed)?, width, height))
    }
}

impl StreamDecoder for VideoDecoder {
    type Frame = VideoFrame;

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close();
        let session = DecodeSession::open(
            self.backend.as_ref(),
            path,
            MediaKind::Video,
            self.config.thread_count,
            self.log.clone(),
        )?;
        let stream = session.stream();
        log_info!(
            self.log,
            "Video: {} {}x{} @ {:.3} fps, {:.3}s",
            stream.codec,
            stream.width,
            stream.height,
            stream.frame_rate.unwrap_or(0.0),
            stream.duration.unwrap_or(0.0)
        );
        self.session = Some(session);
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<VideoFrame>> {
        let session = self.session()?;
        let Some(frame) = session.next_frame()? else {
            return Ok(None);
        };
        let NativeFrame::Video(native) = frame else {
            return Err(Error::WrongFrameKind {
                expected: MediaKind::Video,
                found: MediaKind::Audio,
            });
        };

        let stream = session.stream();
        let fps = stream.frame_rate.filter(|f| *f > 0.0).unwrap_or(DEFAULT_FRAME_RATE);
        let step = stream.time_base.from_seconds(1.0 / fps);
        let raw_pts = session.stamp(native.pts, step);
        let pts = session.seconds(raw_pts);

        let (data, width, height) = self.convert(&native)?;
        let index = self.next_index;
        self.next_index += 1;
        self.current_time = pts;

        Ok(Some(
            VideoFrame::new(data, width, height, self.config.pixel_format)
                .with_timing(pts, raw_pts, index),
        ))
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.session()?.seek(seconds)?;
        self.current_time = seconds;
        Ok(())
    }

    fn close(&mut self) {
        self.converter = None;
        if self.session.take().is_some() {
            log_info!(self.log, "Video decoder closed");
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

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Largest size within `max_width`x`max_height` (0 = unbounded) keeping the
/// aspect ratio. Never upscales.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let mut scale = 1.0f64;
    if max_width > 0 && width > max_width {
        scale = scale.min(max_width as f64 / width as f64);
    }
    if max_height > 0 && height > max_height {
        scale = scale.min(max_height as f64 / height as f64);
    }
    if scale >= 1.0 {
        return (width, height);
    }
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryInput};
    use crate::logging::{Level, MemoryLog};
    use crate::media::PixelFormat;

    fn decoder(backend: &Arc<MemoryBackend>) -> VideoDecoder {
        VideoDecoder::new(
            VideoDecoderConfig::default(),
            backend.clone(),
            Logger::default(),
        )
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("clip.raw", MemoryInput::builder().video(8, 6, 30, 10).build());
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("clip.raw")).unwrap();

        let frames = decoder.read_all().unwrap();
        assert_eq!(frames.len(), 10);
        for pair in frames.windows(2) {
            assert!(pair[0].pts <= pair[1].pts);
            assert!(pair[0].raw_pts <= pair[1].raw_pts);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
        let last = frames.last().unwrap();
        assert!((last.pts - 9.0 / 30.0).abs() < 1e-9);
        assert_eq!(last.format, PixelFormat::Bgr24);
        assert_eq!(last.data.len(), 8 * 6 * 3);
        assert_eq!(last.source, "video");
        assert!((decoder.current_time() - last.pts).abs() < 1e-9);
    }

    #[test]
    fn test_missing_stream_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("audio.raw", MemoryInput::builder().audio(8000, 1, 160, 4).build());
        let mut decoder = decoder(&backend);
        assert!(matches!(
            decoder.open(Path::new("audio.raw")),
            Err(Error::NoSuchStream(MediaKind::Video))
        ));
        assert!(matches!(
            decoder.open(Path::new("nowhere.mp4")),
            Err(Error::Open { .. })
        ));
        assert!(!decoder.is_open());
    }

    #[test]
    fn test_corrupt_packet_is_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "bad.raw",
            MemoryInput::builder()
                .video(4, 4, 25, 5)
                .corrupt(MediaKind::Video, 2)
                .build(),
        );
        let log = MemoryLog::new();
        let mut decoder = VideoDecoder::new(
            VideoDecoderConfig::default(),
            backend.clone(),
            Logger::new(log.clone()),
        );
        decoder.open(Path::new("bad.raw")).unwrap();

        let frames = decoder.read_all().unwrap();
        assert_eq!(frames.len(), 4);
        let stats = decoder.statistics();
        assert_eq!(stats.packets_read, 5);
        assert_eq!(stats.packets_skipped, 1);
        assert_eq!(stats.frames_decoded, 4);
        assert!(log.contains(Level::Warn, "Skipping packet"));
    }

    #[test]
    fn test_seek_backwards_to_key_frame() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("seek.raw", MemoryInput::builder().video(4, 4, 10, 10).build());
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("seek.raw")).unwrap();
        decoder.read_all().unwrap();

        decoder.seek(0.55).unwrap();
        let frame = decoder.read_next().unwrap().unwrap();
        assert!((frame.pts - 0.5).abs() < 1e-9);

        decoder.seek_to_frame(2).unwrap();
        let frame = decoder.read_next().unwrap().unwrap();
        assert!((frame.pts - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_seek_failure_has_no_side_effects() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "pipe.raw",
            MemoryInput::builder().video(4, 4, 10, 4).unseekable().build(),
        );
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("pipe.raw")).unwrap();
        decoder.read_next().unwrap();

        assert!(matches!(decoder.seek(0.0), Err(Error::Seek(_))));
        let frame = decoder.read_next().unwrap().unwrap();
        assert_eq!(frame.index, 1);
        assert!((frame.pts - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_missing_pts_are_synthesised() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "nopts.raw",
            MemoryInput::builder().video(4, 4, 25, 3).without_video_pts().build(),
        );
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("nopts.raw")).unwrap();
        let frames = decoder.read_all().unwrap();
        let pts: Vec<f64> = frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts.len(), 3);
        assert!((pts[1] - 0.04).abs() < 1e-9);
        assert!((pts[2] - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_buffered_frames_are_drained() {
        let backend = Arc::new(MemoryBackend::new().with_decoder_delay(3));
        backend.add_input("delay.raw", MemoryInput::builder().video(4, 4, 30, 6).build());
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("delay.raw")).unwrap();
        assert_eq!(decoder.read_all().unwrap().len(), 6);
        assert!(decoder.read_next().unwrap().is_none());
    }

    #[test]
    fn test_max_size_keeps_aspect() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("big.raw", MemoryInput::builder().video(64, 32, 30, 1).build());
        let config = VideoDecoderConfig {
            pixel_format: PixelFormat::Rgb24,
            max_width: 32,
            ..VideoDecoderConfig::default()
        };
        let mut decoder = VideoDecoder::new(config, backend.clone(), Logger::default());
        decoder.open(Path::new("big.raw")).unwrap();
        let frame = decoder.read_next().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16));
        assert!(frame.is_consistent());

        assert_eq!(fit_within(1920, 1080, 0, 720), (1280, 720));
        assert_eq!(fit_within(640, 360, 1920, 1080), (640, 360));
    }

    #[test]
    fn test_closed_decoder_rejects_reads() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("c.raw", MemoryInput::builder().video(4, 4, 30, 2).build());
        let mut decoder = decoder(&backend);
        decoder.open(Path::new("c.raw")).unwrap();
        assert!(decoder.metadata().is_some());
        decoder.close();
        assert!(decoder.metadata().is_none());
        assert!(matches!(
            decoder.read_next(),
            Err(Error::InvalidState { .. })
        ));
    }
}
