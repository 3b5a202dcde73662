//! Demux + decode loop shared by the video and audio decoders.

use crate::backend::{InputContainer, MediaBackend, PacketDecoder};
use crate::decoder::DecoderStatistics;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{MediaKind, NativeFrame, StreamMetadata};
use crate::{log_debug, log_warn};
use std::path::Path;

/// One opened stream: its codec and the container it reads from.
///
/// Fields drop in declaration order, so the codec goes before the container.
pub(crate) struct DecodeSession {
    decoder: Box<dyn PacketDecoder>,
    input: Box<dyn InputContainer>,
    stream: StreamMetadata,
    eof_sent: bool,
    last_pts: Option<i64>,
    stats: DecoderStatistics,
    log: Logger,
}

impl DecodeSession {
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        kind: MediaKind,
        thread_count: u32,
        log: Logger,
    ) -> Result<Self> {
        let input = backend.open_input(path)?;
        let stream = input
            .streams()
            .iter()
            .find(|s| s.kind == kind)
            .cloned()
            .ok_or(Error::NoSuchStream(kind))?;
        let decoder = backend.open_decoder(&stream, thread_count)?;

        log_debug!(
            log,
            "Opened {} stream #{} ({}, timebase {}) of {}",
            kind,
            stream.index,
            stream.codec,
            stream.time_base,
            path.display()
        );

        Ok(Self {
            decoder,
            input,
            stream,
            eof_sent: false,
            last_pts: None,
            stats: DecoderStatistics::default(),
            log,
        })
    }

    pub fn stream(&self) -> &StreamMetadata {
        &self.stream
    }

    pub fn statistics(&self) -> DecoderStatistics {
        self.stats
    }

    /// Pull packets until the codec hands out a frame. `None` once the codec is
    /// drained after end of file.
    pub fn next_frame(&mut self) -> Result<Option<NativeFrame>> {
        loop {
            match self.decoder.receive_frame() {
                Ok(Some(frame)) => {
                    self.stats.frames_decoded += 1;
                    return Ok(Some(frame));
                }
                Ok(None) if self.eof_sent => return Ok(None),
                Ok(None) => {}
                Err(e) if e.is_recoverable() && !self.eof_sent => {
                    self.stats.packets_skipped += 1;
                    log_warn!(self.log, "Skipping undecodable frame: {}", e);
                }
                Err(e) if e.is_recoverable() => {
                    log_warn!(self.log, "Drain stopped: {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }

            match self.input.read_packet()? {
                Some(packet) if packet.stream_index != self.stream.index => {}
                Some(packet) => {
                    self.stats.packets_read += 1;
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        if !e.is_recoverable() {
                            return Err(e);
                        }
                        self.stats.packets_skipped += 1;
                        log_warn!(
                            self.log,
                            "Skipping packet {:?} of stream #{}: {}",
                            packet.pts,
                            self.stream.index,
                            e
                        );
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
    }

    /// Timestamp for the next delivered frame: regressions are clamped to the
    /// previous value, gaps are filled with `step` ticks.
    pub fn stamp(&mut self, pts: Option<i64>, step: i64) -> i64 {
        let pts = match (pts, self.last_pts) {
            (Some(pts), Some(last)) if pts < last => {
                log_debug!(self.log, "Clamping regressing pts {} to {}", pts, last);
                last
            }
            (Some(pts), _) => pts,
            (None, Some(last)) => last + step.max(1),
            (None, None) => self.stream.start_time.unwrap_or(0),
        };
        self.last_pts = Some(pts);
        pts
    }

    /// Stream time in seconds of `pts`, relative to the stream start.
    pub fn seconds(&self, pts: i64) -> f64 {
        let start = self.stream.start_time.unwrap_or(0);
        self.stream.time_base.to_seconds(pts - start).max(0.0)
    }

    /// Backward key-frame seek to `seconds`; leaves the session untouched on
    /// failure.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        if !self.input.is_seekable() {
            return Err(Error::Seek(format!(
                "stream #{} is not seekable",
                self.stream.index
            )));
        }
        let start = self.stream.start_time.unwrap_or(0);
        let target = start + self.stream.time_base.from_seconds(seconds.max(0.0));
        self.input.seek(self.stream.index, target)?;

        self.decoder.reset()?;
        self.eof_sent = false;
        self.last_pts = None;
        log_debug!(self.log, "Seeked stream #{} to {:.3}s", self.stream.index, seconds);
        Ok(())
    }
}
