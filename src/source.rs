//! Input file with one video and an optional audio decoder.

use crate::backend::MediaBackend;
use crate::decoder::{AudioDecoder, DecoderConfig, StreamDecoder, VideoDecoder};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{AudioFrame, Frame, MediaKind, StreamMetadata, VideoFrame};
use crate::{log_info, log_warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-level facts gathered at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub path: PathBuf,
    /// Size on disk, if the input is a regular file.
    pub file_size: Option<u64>,
    /// Longest stream duration in seconds (0 if unknown).
    pub duration: f64,
    pub video: Option<StreamMetadata>,
    pub audio: Option<StreamMetadata>,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

pub struct MediaSource {
    config: DecoderConfig,
    backend: Arc<dyn MediaBackend>,
    log: Logger,
    video: Option<VideoDecoder>,
    audio: Option<AudioDecoder>,
    info: Option<MediaInfo>,
    video_done: bool,
    audio_done: bool,
}

impl MediaSource {
    pub fn new(config: DecoderConfig, backend: Arc<dyn MediaBackend>, log: Logger) -> Self {
        Self {
            config,
            backend,
            log: log.with_target("upcast::source"),
            video: None,
            audio: None,
            info: None,
            video_done: false,
            audio_done: false,
        }
    }

    /// Open `path`. A missing or undecodable audio stream only disables audio;
    /// container errors are fatal.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        let path = path.as_ref();
        self.close();

        let video = if self.config.enable_video {
            let mut decoder = VideoDecoder::new(
                self.config.video.clone(),
                Arc::clone(&self.backend),
                self.log.clone(),
            );
            match decoder.open(path) {
                Ok(()) => Some(decoder),
                Err(Error::NoSuchStream(kind)) => {
                    log_warn!(self.log, "{}: no {} stream", path.display(), kind);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let audio = if self.config.enable_audio {
            let mut decoder = AudioDecoder::new(
                self.config.audio.clone(),
                Arc::clone(&self.backend),
                self.log.clone(),
            );
            match decoder.open(path) {
                Ok(()) => Some(decoder),
                Err(e @ (Error::NoSuchStream(_) | Error::CodecUnsupported(_))) => {
                    log_warn!(self.log, "{}: audio disabled ({})", path.display(), e);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        if video.is_none() && audio.is_none() {
            return Err(Error::NoSuchStream(MediaKind::Video));
        }

        let video_meta = video.as_ref().and_then(|d| d.metadata().cloned());
        let audio_meta = audio.as_ref().and_then(|d| d.metadata().cloned());
        let duration = [&video_meta, &audio_meta]
            .into_iter()
            .flatten()
            .filter_map(|m| m.duration)
            .fold(0.0, f64::max);

        let info = MediaInfo {
            path: path.to_path_buf(),
            file_size: std::fs::metadata(path).ok().map(|m| m.len()),
            duration,
            video: video_meta,
            audio: audio_meta,
        };
        log_info!(
            self.log,
            "Opened {} ({:.3}s, video: {}, audio: {})",
            path.display(),
            duration,
            info.has_video(),
            info.has_audio()
        );

        self.video = video;
        self.audio = audio;
        self.info = Some(info.clone());
        Ok(info)
    }

    pub fn is_open(&self) -> bool {
        self.info.is_some()
    }

    pub fn info(&self) -> Option<&MediaInfo> {
        self.info.as_ref()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Whether `kind` has nothing more to deliver: the stream is disabled or
    /// its decoder reached end of stream.
    pub fn is_exhausted(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video.is_none() || self.video_done,
            MediaKind::Audio => self.audio.is_none() || self.audio_done,
        }
    }

    pub fn video_decoder(&self) -> Option<&VideoDecoder> {
        self.video.as_ref()
    }

    pub fn audio_decoder(&self) -> Option<&AudioDecoder> {
        self.audio.as_ref()
    }

    pub fn read_video(&mut self) -> Result<Option<VideoFrame>> {
        let decoder = self
            .video
            .as_mut()
            .ok_or(Error::StreamDisabled(MediaKind::Video))?;
        let frame = decoder.read_next()?;
        self.video_done = frame.is_none();
        Ok(frame)
    }

    pub fn read_audio(&mut self) -> Result<Option<AudioFrame>> {
        let decoder = self
            .audio
            .as_mut()
            .ok_or(Error::StreamDisabled(MediaKind::Audio))?;
        let frame = decoder.read_next()?;
        self.audio_done = frame.is_none();
        Ok(frame)
    }

    /// Next frame from whichever stream lags behind (video on ties); `None`
    /// once both are exhausted.
    pub fn read_next(&mut self) -> Result<Option<Frame>> {
        if !self.is_open() {
            return Err(Error::invalid_state("MediaSource", "read", "closed"));
        }
        loop {
            let video_pending = self.video.is_some() && !self.video_done;
            let audio_pending = self.audio.is_some() && !self.audio_done;

            let pick_video = match (video_pending, audio_pending) {
                (false, false) => return Ok(None),
                (true, false) => true,
                (false, true) => false,
                (true, true) => self.time_of(MediaKind::Video) <= self.time_of(MediaKind::Audio),
            };

            if pick_video {
                if let Some(frame) = self.read_video()? {
                    return Ok(Some(Frame::Video(frame)));
                }
            } else if let Some(frame) = self.read_audio()? {
                return Ok(Some(Frame::Audio(frame)));
            }
        }
    }

    fn time_of(&self, kind: MediaKind) -> f64 {
        match kind {
            MediaKind::Video => self.video.as_ref().map_or(0.0, |d| d.current_time()),
            MediaKind::Audio => self.audio.as_ref().map_or(0.0, |d| d.current_time()),
        }
    }

    /// Seek every enabled stream to `seconds`.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        if let Some(video) = self.video.as_mut() {
            video.seek(seconds)?;
            self.video_done = false;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.seek(seconds)?;
            self.audio_done = false;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.close();
        }
        if let Some(mut video) = self.video.take() {
            video.close();
        }
        if let Some(info) = self.info.take() {
            log_info!(self.log, "Closed {}", info.path.display());
        }
        self.video_done = false;
        self.audio_done = false;
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.close();
    }
}
