//! Encoder/muxer orchestration for one output file.

use crate::backend::MediaBackend;
use crate::encoder::{AudioEncoder, AudioEncoderConfig, VideoEncoder, VideoEncoderConfig};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{Frame, MediaKind, Packet};
use crate::muxer::{Muxer, MuxerConfig, MuxerStatistics};
use crate::pipeline::{PipelineHealth, PipelineState};
use crate::{log_debug, log_error, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Output settings of a transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub output_path: PathBuf,
    pub format: String,
    pub fast_start: bool,
    pub interleaved: bool,
    pub video: VideoEncoderConfig,
    /// `None` writes a video-only file.
    pub audio: Option<AudioEncoderConfig>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        let muxer = MuxerConfig::default();
        Self {
            output_path: muxer.output_path,
            format: muxer.format,
            fast_start: muxer.fast_start,
            interleaved: muxer.interleaved,
            video: VideoEncoderConfig::default(),
            audio: Some(AudioEncoderConfig::default()),
        }
    }
}

impl TranscodeConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    pub fn muxer_config(&self) -> MuxerConfig {
        MuxerConfig {
            output_path: self.output_path.clone(),
            format: self.format.clone(),
            fast_start: self.fast_start,
            interleaved: self.interleaved,
        }
    }
}

/// Progress of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeStatistics {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub bytes_written: u64,
    /// Seconds of media written.
    pub duration: f64,
    /// Media seconds per wall-clock second.
    pub encoding_speed: f64,
    pub elapsed: Duration,
    pub muxer: MuxerStatistics,
}

impl std::fmt::Display for TranscodeStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} video / {} audio frames, {} bytes, {:.2}s of media in {:.2}s ({:.2}x)",
            self.video_frames,
            self.audio_frames,
            self.bytes_written,
            self.duration,
            self.elapsed.as_secs_f64(),
            self.encoding_speed
        )
    }
}

// fields drop in order: encoders (conversion, codec) before the container
struct Session {
    video: VideoEncoder,
    audio: Option<AudioEncoder>,
    muxer: Muxer,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    /// False when no video frame will ever arrive, so the header does not
    /// wait for an auto-sized video encoder.
    video_expected: bool,
    /// Packets produced before the header could be written.
    pending: Vec<(MediaKind, Packet)>,
}

impl Session {
    fn header_written(&self) -> bool {
        self.muxer.statistics().header_written
    }

    /// Declare the streams and write the header once every encoder knows its
    /// parameters, or unconditionally with whatever is open when `force`.
    fn try_write_header(&mut self, force: bool, log: &Logger) -> Result<bool> {
        if self.header_written() {
            return Ok(true);
        }
        let video_ready = self.video.is_open() || !self.video_expected;
        let audio_ready = self.audio.as_ref().is_none_or(|a| a.is_open());
        if !force && !(video_ready && audio_ready) {
            return Ok(false);
        }

        if let Some(params) = self.video.parameters() {
            self.video_stream = Some(self.muxer.add_stream(&params, true)?);
        }
        if let Some(params) = self.audio.as_ref().and_then(|a| a.parameters()) {
            self.audio_stream = Some(self.muxer.add_stream(&params, false)?);
        }
        if self.video_stream.is_none() && self.audio_stream.is_none() {
            log_warn!(log, "No frame reached an encoder, nothing to write");
            return Ok(false);
        }
        self.muxer.write_header()?;

        for (kind, packet) in std::mem::take(&mut self.pending) {
            self.write(kind, packet)?;
        }
        Ok(true)
    }

    fn write(&mut self, kind: MediaKind, packet: Packet) -> Result<()> {
        let stream = match kind {
            MediaKind::Video => self.video_stream,
            MediaKind::Audio => self.audio_stream,
        };
        match stream {
            Some(index) => self.muxer.write_packet(packet, index),
            // the stream never opened; the header went out without it
            None => Ok(()),
        }
    }

    fn submit(&mut self, kind: MediaKind, packets: Vec<Packet>, force: bool, log: &Logger) -> Result<()> {
        if self.try_write_header(force, log)? {
            for packet in packets {
                self.write(kind, packet)?;
            }
        } else {
            self.pending.extend(packets.into_iter().map(|p| (kind, p)));
        }
        Ok(())
    }

    fn flush(&mut self, log: &Logger) -> Result<()> {
        let video = self.video.flush()?;
        self.submit(MediaKind::Video, video, true, log)?;
        if let Some(audio) = self.audio.as_mut() {
            let packets = audio.flush()?;
            self.submit(MediaKind::Audio, packets, true, log)?;
        }
        Ok(())
    }
}

struct ControllerInner {
    state: PipelineState,
    session: Option<Session>,
    video_frames: u64,
    audio_frames: u64,
    started: Option<Instant>,
    elapsed: Option<Duration>,
    /// Muxer counters kept after the session is released.
    final_stats: Option<MuxerStatistics>,
}

/// Binds the encoders to the muxer for one output file.
///
/// All calls take `&self`, so an observer can query `statistics()` while a
/// worker pushes frames.
pub struct TranscodeController {
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    health: Option<Arc<PipelineHealth>>,
    video_input: bool,
    inner: Mutex<ControllerInner>,
}

impl TranscodeController {
    pub fn new(backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            backend,
            log: log.with_target("upcast::controller"),
            health: None,
            video_input: true,
            inner: Mutex::new(ControllerInner {
                state: PipelineState::Uninitialized,
                session: None,
                video_frames: 0,
                audio_frames: 0,
                started: None,
                elapsed: None,
                final_stats: None,
            }),
        }
    }

    /// Report muxed packets to `health`.
    pub fn with_health(mut self, health: Arc<PipelineHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Declare whether the input delivers video frames at all. Without video
    /// the header goes out as soon as the audio encoder is open.
    pub fn with_video_input(mut self, present: bool) -> Self {
        self.video_input = present;
        self
    }

    /// Create the muxer and the encoders. Streams are declared right away
    /// unless a size or layout must come from the first frame.
    pub fn init(&self, config: &TranscodeConfig) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != PipelineState::Uninitialized {
            return Err(Error::invalid_state("TranscodeController", "init", inner.state));
        }

        let muxer = Muxer::new(config.muxer_config(), self.backend.as_ref(), self.log.clone())?;

        let mut video = VideoEncoder::new(Arc::clone(&self.backend), self.log.clone());
        video.init(config.video.clone(), None)?;

        let audio = match &config.audio {
            Some(audio_config) => {
                let mut audio = AudioEncoder::new(Arc::clone(&self.backend), self.log.clone());
                audio.init(audio_config.clone(), None)?;
                Some(audio)
            }
            None => None,
        };

        let mut session = Session {
            video,
            audio,
            muxer,
            video_stream: None,
            audio_stream: None,
            video_expected: self.video_input,
            pending: Vec::new(),
        };
        if !session.try_write_header(false, &self.log)? {
            log_debug!(self.log, "Header deferred until the first frame");
        }

        log_info!(
            self.log,
            "Transcoding to {} ({}, audio {})",
            config.output_path.display(),
            session.muxer.format(),
            if session.audio.is_some() { "on" } else { "off" }
        );
        inner.session = Some(session);
        inner.started = Some(Instant::now());
        inner
            .state
            .transition(PipelineState::Running, "TranscodeController", "init")
    }

    /// Encode `frame` with the encoder of its type and write the packets.
    pub fn push(&self, frame: &Frame) -> Result<()> {
        let mut inner = self.lock();
        if !inner.state.is_running() {
            return Err(Error::invalid_state("TranscodeController", "push", inner.state));
        }
        let ControllerInner {
            session,
            video_frames,
            audio_frames,
            ..
        } = &mut *inner;
        let session = session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("TranscodeController", "push", "released"))?;

        let before = session.muxer.statistics();
        match frame {
            Frame::Video(video) => {
                let packets = session.video.encode(video)?;
                *video_frames += 1;
                session.submit(MediaKind::Video, packets, false, &self.log)?;
            }
            Frame::Audio(audio) => {
                let encoder = session
                    .audio
                    .as_mut()
                    .ok_or(Error::StreamDisabled(MediaKind::Audio))?;
                let packets = encoder.encode(audio)?;
                *audio_frames += 1;
                session.submit(MediaKind::Audio, packets, false, &self.log)?;
            }
        }
        self.report(&before, &session.muxer);
        Ok(())
    }

    /// Drain both encoders into the container.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut ControllerInner) -> Result<()> {
        if !inner.state.can_transition_to(&PipelineState::Flushed) {
            return Err(Error::invalid_state("TranscodeController", "flush", inner.state));
        }
        let session = inner
            .session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("TranscodeController", "flush", "released"))?;
        let before = session.muxer.statistics();
        let result = session.flush(&self.log);
        self.report(&before, &session.muxer);
        // encoders are drained (or broken) either way
        inner.state = PipelineState::Flushed;
        result
    }

    /// Flush if still running, write the trailer and release everything.
    /// Safe to call at any point; a second call does nothing.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state.is_closed() {
            return Ok(());
        }

        let mut result = Ok(());
        if inner.state.is_running()
            && let Err(err) = self.flush_locked(&mut inner)
        {
            log_error!(self.log, "Flush failed: {}", err);
            result = Err(err);
        }

        if let Some(mut session) = inner.session.take() {
            if let Err(err) = session.muxer.finalize() {
                log_error!(self.log, "Finalize failed: {}", err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
            inner.final_stats = Some(session.muxer.statistics());
            if let Some(audio) = session.audio.as_mut() {
                audio.close();
            }
            session.video.close();
        }
        inner.elapsed = inner.started.map(|s| s.elapsed());
        inner.state = PipelineState::Closed;
        log_debug!(self.log, "Controller closed");
        result
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn statistics(&self) -> TranscodeStatistics {
        let inner = self.lock();
        let muxer = match (&inner.session, &inner.final_stats) {
            (Some(session), _) => session.muxer.statistics(),
            (None, Some(stats)) => stats.clone(),
            (None, None) => MuxerStatistics::default(),
        };
        let elapsed = inner
            .elapsed
            .or_else(|| inner.started.map(|s| s.elapsed()))
            .unwrap_or_default();
        let seconds = elapsed.as_secs_f64();
        TranscodeStatistics {
            video_frames: inner.video_frames,
            audio_frames: inner.audio_frames,
            bytes_written: muxer.total_bytes(),
            duration: muxer.duration,
            encoding_speed: if seconds > 0.0 {
                muxer.duration / seconds
            } else {
                0.0
            },
            elapsed,
            muxer,
        }
    }

    fn report(&self, before: &MuxerStatistics, muxer: &Muxer) {
        if let Some(health) = &self.health {
            let after = muxer.statistics();
            health.record_muxed(
                after.total_packets() - before.total_packets(),
                after.total_bytes() - before.total_bytes(),
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TranscodeController {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log_warn!(self.log, "Close on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryInput, MuxEvent};
    use crate::decoder::{StreamDecoder, VideoDecoder, VideoDecoderConfig};
    use crate::encoder::RateControl;
    use crate::media::{AudioFrame, PixelFormat, SampleFormat, TimeBase, VideoFrame};

    fn video(width: u32, height: u32, index: u64) -> Frame {
        let data = vec![90; PixelFormat::Bgr24.buffer_size(width, height)];
        Frame::Video(
            VideoFrame::new(data, width, height, PixelFormat::Bgr24).with_timing(
                index as f64 / 30.0,
                index as i64,
                index,
            ),
        )
    }

    fn audio(samples: usize, index: u64) -> Frame {
        let data = vec![0; samples * 4];
        Frame::Audio(
            AudioFrame::new(data, 48_000, 2, samples, SampleFormat::S16).with_timing(
                (index * samples as u64) as f64 / 48_000.0,
                0,
                index,
            ),
        )
    }

    fn controller(backend: &Arc<MemoryBackend>) -> TranscodeController {
        TranscodeController::new(backend.clone(), Logger::default())
    }

    #[test]
    fn test_ten_frames_auto_size_quality() {
        let backend = Arc::new(MemoryBackend::new().with_encoder_delay(2));
        backend.add_input("in.raw", MemoryInput::builder().video(320, 240, 30, 10).build());

        let mut decoder = VideoDecoder::new(
            VideoDecoderConfig::default(),
            backend.clone(),
            Logger::default(),
        );
        decoder.open(std::path::Path::new("in.raw")).unwrap();

        let config = TranscodeConfig {
            video: VideoEncoderConfig {
                rate_control: RateControl::Quality(18),
                ..VideoEncoderConfig::default()
            },
            audio: None,
            ..TranscodeConfig::new("out.mp4")
        };
        let controller = controller(&backend);
        controller.init(&config).unwrap();

        let mut pushed = 0;
        while let Some(frame) = decoder.read_next().unwrap() {
            controller.push(&Frame::Video(frame)).unwrap();
            pushed += 1;
        }
        assert_eq!(pushed, 10);
        controller.close().unwrap();

        let output = backend.output("out.mp4").unwrap();
        let events = output.events();
        assert!(matches!(events.first(), Some(MuxEvent::Header { .. })));
        assert_eq!(output.header_count(), 1);
        assert_eq!(output.trailer_count(), 1);
        assert!(matches!(events.last(), Some(MuxEvent::Trailer)));

        let streams = output.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!((streams[0].width, streams[0].height), (320, 240));

        let packets = output.packets();
        assert!(packets.len() >= 10);
        assert!(packets.windows(2).all(|w| w[0].pts <= w[1].pts));
        assert_eq!(packets[1].time_base, TimeBase::new(1, 90_000));

        let stats = controller.statistics();
        assert_eq!(stats.video_frames, 10);
        assert_eq!(stats.muxer.video_packets, 10);
        assert!(stats.muxer.finalized);
        assert_eq!(controller.state(), PipelineState::Closed);
    }

    #[test]
    fn test_audio_and_video() {
        let backend = Arc::new(MemoryBackend::new());
        let config = TranscodeConfig {
            video: VideoEncoderConfig {
                width: 64,
                height: 48,
                ..VideoEncoderConfig::default()
            },
            ..TranscodeConfig::new("av.mp4")
        };
        let controller = controller(&backend);
        controller.init(&config).unwrap();

        // header is written at init when nothing is automatic
        let output = backend.output("av.mp4").unwrap();
        assert_eq!(output.header_count(), 1);
        assert_eq!(output.streams().len(), 2);

        for i in 0..6 {
            controller.push(&video(64, 48, i)).unwrap();
            controller.push(&audio(800, i)).unwrap();
        }
        controller.flush().unwrap();
        assert_eq!(controller.state(), PipelineState::Flushed);
        controller.close().unwrap();

        let stats = controller.statistics();
        assert_eq!((stats.video_frames, stats.audio_frames), (6, 6));
        assert_eq!(stats.muxer.video_packets, 6);
        // 4800 samples in 1024-sample blocks
        assert_eq!(stats.muxer.audio_packets, 5);
        assert_eq!(stats.bytes_written, stats.muxer.total_bytes());
        assert_eq!(output.trailer_count(), 1);
    }

    #[test]
    fn test_header_waits_for_first_video_frame() {
        let backend = Arc::new(MemoryBackend::new());
        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig {
                codec: String::from("pcm_s16le"),
                ..AudioEncoderConfig::default()
            }),
            ..TranscodeConfig::new("late.mp4")
        };
        let controller = controller(&backend);
        controller.init(&config).unwrap();

        controller.push(&audio(480, 0)).unwrap();
        controller.push(&audio(480, 1)).unwrap();
        let output = backend.output("late.mp4").unwrap();
        assert_eq!(output.header_count(), 0);

        controller.push(&video(32, 32, 0)).unwrap();
        let events = output.events();
        assert!(matches!(events[0], MuxEvent::Header { .. }));
        // the held audio packets follow the header, then the video packet
        let indices: Vec<usize> = output.packets().iter().map(|p| p.stream_index).collect();
        assert_eq!(indices, vec![1, 1, 0]);

        controller.close().unwrap();
        assert_eq!(output.trailer_count(), 1);
    }

    #[test]
    fn test_audio_only_input_writes_header_right_away() {
        let backend = Arc::new(MemoryBackend::new());
        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig {
                codec: String::from("pcm_s16le"),
                ..AudioEncoderConfig::default()
            }),
            ..TranscodeConfig::new("voice.mp4")
        };
        let controller = controller(&backend).with_video_input(false);
        controller.init(&config).unwrap();

        let output = backend.output("voice.mp4").unwrap();
        assert_eq!(output.header_count(), 1);
        assert_eq!(output.streams().len(), 1);
        assert_eq!(output.streams()[0].kind, MediaKind::Audio);

        controller.push(&audio(480, 0)).unwrap();
        controller.push(&audio(480, 1)).unwrap();
        assert_eq!(output.packets().len(), 2);

        controller.close().unwrap();
        assert_eq!(output.trailer_count(), 1);
    }

    #[test]
    fn test_state_machine() {
        let backend = Arc::new(MemoryBackend::new());
        let controller = controller(&backend);
        assert!(matches!(
            controller.push(&video(8, 8, 0)),
            Err(Error::InvalidState { .. })
        ));

        let config = TranscodeConfig {
            audio: None,
            ..TranscodeConfig::new("s.mp4")
        };
        controller.init(&config).unwrap();
        assert!(controller.init(&config).is_err());
        assert!(matches!(
            controller.push(&audio(10, 0)),
            Err(Error::StreamDisabled(MediaKind::Audio))
        ));
        controller.push(&video(8, 8, 0)).unwrap();

        controller.close().unwrap();
        controller.close().unwrap();
        let err = controller.push(&video(8, 8, 1)).unwrap_err();
        assert_eq!(err.to_string(), "TranscodeController: cannot push while Closed");
        assert!(controller.flush().is_err());
        assert_eq!(backend.output("s.mp4").unwrap().trailer_count(), 1);
    }

    #[test]
    fn test_unknown_format_and_codec() {
        let backend = Arc::new(MemoryBackend::new());
        let controller = controller(&backend);
        let config = TranscodeConfig {
            format: String::from("webm_magic"),
            ..TranscodeConfig::new("x.bin")
        };
        assert!(matches!(
            controller.init(&config),
            Err(Error::CodecNotFound(_))
        ));
        assert_eq!(controller.state(), PipelineState::Uninitialized);

        let config = TranscodeConfig {
            audio: Some(AudioEncoderConfig {
                codec: String::from("nope"),
                ..AudioEncoderConfig::default()
            }),
            ..TranscodeConfig::new("y.mp4")
        };
        assert!(matches!(
            controller.init(&config),
            Err(Error::CodecNotFound(_))
        ));
        controller.close().unwrap();
    }

    #[test]
    fn test_close_without_frames() {
        let backend = Arc::new(MemoryBackend::new());
        let controller = controller(&backend);
        let config = TranscodeConfig {
            audio: None,
            ..TranscodeConfig::new("empty.mp4")
        };
        controller.init(&config).unwrap();
        controller.close().unwrap();

        let output = backend.output("empty.mp4").unwrap();
        assert_eq!(output.header_count(), 0);
        assert_eq!(output.trailer_count(), 0);
    }
}
