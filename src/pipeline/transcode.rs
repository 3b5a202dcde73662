//! The read → enhance → schedule → encode → mux loop for one input file.

use crate::backend::MediaBackend;
use crate::decoder::{DecoderConfig, StreamDecoder};
use crate::enhance::{FrameEnhancer, Passthrough, enhance_frame};
use crate::error::Result;
use crate::logging::Logger;
use crate::media::{Frame, MediaKind};
use crate::pipeline::{
    PipelineHealth, SyncScheduler, TranscodeConfig, TranscodeController, TranscodeStatistics,
};
use crate::source::{MediaInfo, MediaSource};
use crate::utils::sos::SignalOfStop;
use crate::utils::string::{format_bytes, format_seconds};
use crate::{log_debug, log_info, log_warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one transcode.
#[derive(Debug, Clone)]
pub struct TranscodeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub info: MediaInfo,
    pub statistics: TranscodeStatistics,
    /// Frames read from the source (both types).
    pub frames_read: u64,
    pub packets_skipped: u64,
    /// Stopped by the stop signal before the end of the input.
    pub interrupted: bool,
}

impl std::fmt::Display for TranscodeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}: {} video / {} audio frames, {} of media, {}, {:.2}x",
            self.input.display(),
            self.output.display(),
            self.statistics.video_frames,
            self.statistics.audio_frames,
            format_seconds(self.statistics.duration),
            format_bytes(self.statistics.bytes_written),
            self.statistics.encoding_speed
        )?;
        if self.packets_skipped > 0 {
            write!(f, ", {} corrupt packets skipped", self.packets_skipped)?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Drives one input through the whole pipeline.
pub struct Transcoder {
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    decoder: DecoderConfig,
    enhancer: Box<dyn FrameEnhancer>,
    start: Option<f64>,
    max_frames: Option<u64>,
    stop: SignalOfStop,
    health: Arc<PipelineHealth>,
}

impl Transcoder {
    pub fn new(backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            backend,
            log: log.with_target("upcast::transcode"),
            decoder: DecoderConfig::default(),
            enhancer: Box::new(Passthrough),
            start: None,
            max_frames: None,
            stop: SignalOfStop::new(),
            health: Arc::new(PipelineHealth::new()),
        }
    }

    pub fn with_decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder = config;
        self
    }

    pub fn with_enhancer(mut self, enhancer: Box<dyn FrameEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    /// Start at `seconds` into the input.
    pub fn with_start(mut self, seconds: f64) -> Self {
        self.start = (seconds > 0.0).then_some(seconds);
        self
    }

    /// Stop after `frames` video frames (all frames for audio-only inputs).
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn with_stop_signal(mut self, stop: SignalOfStop) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_health(mut self, health: Arc<PipelineHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    /// Transcode `input` with `config`; the output file is finalized even
    /// when the stop signal ends the loop early.
    pub fn run(&mut self, input: &Path, mut config: TranscodeConfig) -> Result<TranscodeReport> {
        let mut source = MediaSource::new(
            self.decoder.clone(),
            Arc::clone(&self.backend),
            self.log.clone(),
        );
        let info = source.open(input)?;
        self.adapt_config(&info, &mut config);

        if let Some(start) = self.start {
            log_debug!(self.log, "Seeking to {}", format_seconds(start));
            source.seek(start)?;
        }

        let controller = TranscodeController::new(Arc::clone(&self.backend), self.log.clone())
            .with_health(Arc::clone(&self.health))
            .with_video_input(source.has_video());
        controller.init(&config)?;

        let pumped = self.pump(&mut source, &controller);
        let packets_skipped = Self::skipped(&source);
        self.health.set_packets_skipped(packets_skipped);
        source.close();

        let closed = controller.close();
        let (frames_read, interrupted) = pumped?;
        closed?;

        let report = TranscodeReport {
            input: input.to_path_buf(),
            output: config.output_path.clone(),
            info,
            statistics: controller.statistics(),
            frames_read,
            packets_skipped,
            interrupted,
        };
        log_info!(self.log, "{}", report);
        Ok(report)
    }

    /// Disable audio for silent inputs and pick the source frame rate when
    /// none is configured.
    fn adapt_config(&self, info: &MediaInfo, config: &mut TranscodeConfig) {
        if !info.has_audio() && config.audio.take().is_some() {
            log_info!(self.log, "{}: no audio, writing video only", info.path.display());
        }
        if !(config.video.frame_rate > 0.0) {
            config.video.frame_rate = info
                .video
                .as_ref()
                .and_then(|v| v.frame_rate)
                .filter(|r| *r > 0.0)
                .unwrap_or(30.0);
        }
    }

    /// Returns the number of frames read and whether the stop signal fired.
    fn pump(&mut self, source: &mut MediaSource, controller: &TranscodeController) -> Result<(u64, bool)> {
        let mut scheduler = SyncScheduler::new();
        let has_video = source.has_video();
        let mut frames_read = 0;
        let mut counted = 0;
        let mut interrupted = false;

        loop {
            if self.stop.cancelled() {
                log_warn!(self.log, "Stop requested, finalizing the output");
                interrupted = true;
                break;
            }
            if self.max_frames.is_some_and(|max| counted >= max) {
                log_debug!(self.log, "Frame limit reached");
                break;
            }

            let Some(frame) = source.read_next()? else {
                break;
            };
            frames_read += 1;
            self.health.record_decoded();
            if self.before_start(&frame) {
                continue;
            }
            if frame.is_video() || !has_video {
                counted += 1;
            }

            let frame = match frame {
                Frame::Video(video) => {
                    let enhanced = enhance_frame(self.enhancer.as_mut(), video)?;
                    self.health.record_enhanced();
                    Frame::Video(enhanced)
                }
                audio => audio,
            };
            scheduler.push(frame);

            // a finished stream no longer holds back the other one
            let video_open = !source.is_exhausted(MediaKind::Video);
            let audio_open = !source.is_exhausted(MediaKind::Audio);
            while let Some(frame) = scheduler.pop_ready(video_open, audio_open) {
                self.encode(controller, &frame)?;
            }
        }

        while scheduler.has_next() {
            let frame = scheduler.pop_next()?;
            self.encode(controller, &frame)?;
        }
        Ok((frames_read, interrupted))
    }

    fn encode(&self, controller: &TranscodeController, frame: &Frame) -> Result<()> {
        controller.push(frame)?;
        self.health.record_encoded(frame.pts());
        Ok(())
    }

    // a backward seek lands on a key frame before the start point
    fn before_start(&self, frame: &Frame) -> bool {
        let Some(start) = self.start else {
            return false;
        };
        match frame {
            Frame::Video(video) => video.pts < start,
            Frame::Audio(audio) => audio.pts + audio.duration() <= start,
        }
    }

    fn skipped(source: &MediaSource) -> u64 {
        let video = source
            .video_decoder()
            .map_or(0, |d| d.statistics().packets_skipped);
        let audio = source
            .audio_decoder()
            .map_or(0, |d| d.statistics().packets_skipped);
        video + audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryInput, MuxEvent};
    use crate::convert::ScaleFilter;
    use crate::encoder::{AudioEncoderConfig, RateControl, VideoEncoderConfig};
    use crate::enhance::{Image, Upscale};

    fn transcoder(backend: &Arc<MemoryBackend>) -> Transcoder {
        Transcoder::new(backend.clone(), Logger::default())
    }

    fn video_only(output: &str) -> TranscodeConfig {
        TranscodeConfig {
            video: VideoEncoderConfig {
                rate_control: RateControl::Quality(18),
                ..VideoEncoderConfig::default()
            },
            audio: None,
            ..TranscodeConfig::new(output)
        }
    }

    #[test]
    fn test_video_only_end_to_end() {
        let backend = Arc::new(MemoryBackend::new().with_encoder_delay(1));
        backend.add_input("clip", MemoryInput::builder().video(64, 36, 30, 10).build());

        let report = transcoder(&backend)
            .run(Path::new("clip"), video_only("clip.mp4"))
            .unwrap();
        assert_eq!(report.frames_read, 10);
        assert_eq!(report.statistics.video_frames, 10);
        assert!(!report.interrupted);

        let output = backend.output("clip.mp4").unwrap();
        assert!(matches!(output.events()[0], MuxEvent::Header { .. }));
        assert_eq!(output.streams().len(), 1);
        assert_eq!(output.trailer_count(), 1);
        let packets = output.packets();
        assert_eq!(packets.len(), 10);
        assert!(packets.windows(2).all(|w| w[0].pts <= w[1].pts));
    }

    #[test]
    fn test_audio_video_with_upscale() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "av",
            MemoryInput::builder()
                .video(32, 18, 25, 25)
                .audio(48_000, 2, 960, 50)
                .build(),
        );

        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig::default()),
            ..video_only("av.mp4")
        };
        let mut transcoder =
            transcoder(&backend).with_enhancer(Box::new(Upscale::new(2, ScaleFilter::Nearest)));
        let report = transcoder.run(Path::new("av"), config).unwrap();

        let output = backend.output("av.mp4").unwrap();
        let streams = output.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!((streams[0].width, streams[0].height), (64, 36));
        assert_eq!(streams[1].kind, MediaKind::Audio);

        assert_eq!(report.statistics.video_frames, 25);
        assert_eq!(report.statistics.audio_frames, 50);
        let health = transcoder.health().summary();
        assert_eq!(health.frames_enhanced, 25);
        assert_eq!(health.frames_encoded, 75);
        assert_eq!(health.packets_muxed, report.statistics.muxer.total_packets());
    }

    /// Records how many decoded frames are waiting to be encoded each time a
    /// video frame reaches the enhancer.
    struct BacklogMeter {
        health: Arc<PipelineHealth>,
        max_backlog: Arc<std::sync::atomic::AtomicU64>,
    }

    impl FrameEnhancer for BacklogMeter {
        fn name(&self) -> &str {
            "meter"
        }

        fn enhance(&mut self, image: Image) -> anyhow::Result<Image> {
            let backlog = self.health.frames_decoded() - self.health.frames_encoded();
            self.max_backlog
                .fetch_max(backlog, std::sync::atomic::Ordering::Relaxed);
            Ok(image)
        }
    }

    #[test]
    fn test_short_audio_does_not_hold_back_video() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "short",
            MemoryInput::builder()
                .video(16, 16, 30, 300)
                .audio(48_000, 2, 960, 1)
                .build(),
        );

        let health = Arc::new(PipelineHealth::new());
        let max_backlog = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let meter = BacklogMeter {
            health: Arc::clone(&health),
            max_backlog: Arc::clone(&max_backlog),
        };
        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig::default()),
            ..video_only("short.mp4")
        };
        let report = transcoder(&backend)
            .with_health(health)
            .with_enhancer(Box::new(meter))
            .run(Path::new("short"), config)
            .unwrap();

        assert_eq!(report.statistics.video_frames, 300);
        assert_eq!(report.statistics.audio_frames, 1);
        let max = max_backlog.load(std::sync::atomic::Ordering::Relaxed);
        assert!(max <= 3, "{} frames waited in the scheduler", max);
    }

    #[test]
    fn test_silent_input_disables_audio() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("silent", MemoryInput::builder().video(16, 16, 30, 3).build());

        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig::default()),
            ..video_only("silent.mp4")
        };
        transcoder(&backend).run(Path::new("silent"), config).unwrap();
        assert_eq!(backend.output("silent.mp4").unwrap().streams().len(), 1);
    }

    #[test]
    fn test_frame_limit_and_start() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("long", MemoryInput::builder().video(16, 16, 10, 100).build());

        let report = transcoder(&backend)
            .with_start(2.0)
            .with_max_frames(5)
            .run(Path::new("long"), video_only("long.mp4"))
            .unwrap();
        assert_eq!(report.statistics.video_frames, 5);
        assert_eq!(backend.output("long.mp4").unwrap().packets().len(), 5);
    }

    #[test]
    fn test_stop_signal_still_finalizes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input("stop", MemoryInput::builder().video(16, 16, 30, 30).build());

        let stop = SignalOfStop::new();
        stop.cancel();
        let report = transcoder(&backend)
            .with_stop_signal(stop)
            .run(Path::new("stop"), video_only("stop.mp4"))
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.frames_read, 0);
        // nothing was encoded, so the output never got a header
        assert_eq!(backend.output("stop.mp4").unwrap().header_count(), 0);
    }

    #[test]
    fn test_corrupt_packets_are_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_input(
            "bad",
            MemoryInput::builder()
                .video(16, 16, 30, 6)
                .corrupt(MediaKind::Video, 2)
                .build(),
        );
        let report = transcoder(&backend)
            .run(Path::new("bad"), video_only("bad.mp4"))
            .unwrap();
        assert_eq!(report.packets_skipped, 1);
        assert_eq!(report.statistics.video_frames, 5);
    }

    #[test]
    fn test_missing_input_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let err = transcoder(&backend)
            .run(Path::new("nowhere"), video_only("x.mp4"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Open { .. }));
        assert!(backend.output("x.mp4").is_none());
    }
}
