//! Output container writer.
//!
//! The muxer owns the container lifecycle, rescales encoder timestamps into
//! the timebase the container picked for every stream and keeps per-stream
//! DTS strictly increasing. All calls take `&self`; the state lives behind a
//! mutex so an observer thread can query statistics while a worker writes.

mod state;

pub use state::{MuxerOp, MuxerState};

use crate::backend::{ContainerWriter, MediaBackend};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::media::{CodecParameters, MediaKind, Packet, TimeBase};
use crate::{log_debug, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Output container settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    pub output_path: PathBuf,
    /// Container short name (`mp4`, `matroska`, ...). Empty = guess from the
    /// output file extension.
    pub format: String,
    /// Move the index to the front of the file (`movflags=+faststart`).
    pub fast_start: bool,
    /// Let the container interleave packets of different streams by time.
    pub interleaved: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("output.mp4"),
            format: String::from("mp4"),
            fast_start: true,
            interleaved: true,
        }
    }
}

impl MuxerConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Resolved container name: the explicit format, or a guess from the
    /// output extension.
    pub fn format_name(&self) -> Option<String> {
        if !self.format.is_empty() {
            return Some(canonical_format(&self.format).to_string());
        }
        let extension = self.output_path.extension()?.to_str()?.to_ascii_lowercase();
        let format = match extension.as_str() {
            "mp4" | "m4v" | "m4a" => "mp4",
            "mov" => "mov",
            "mkv" | "mka" => "matroska",
            "nut" => "nut",
            "avi" => "avi",
            _ => return None,
        };
        Some(format.to_string())
    }

    /// Human readable format request, used in error messages.
    pub fn describe_format(&self) -> String {
        if self.format.is_empty() {
            format!("(guessed from {})", self.output_path.display())
        } else {
            self.format.clone()
        }
    }
}

fn canonical_format(name: &str) -> &str {
    match name {
        "mkv" => "matroska",
        other => other,
    }
}

/// Per-stream bookkeeping, created by [`Muxer::add_stream`].
#[derive(Debug, Clone)]
pub struct MuxerStreamSlot {
    pub index: usize,
    pub kind: MediaKind,
    /// Copy of the encoder parameters taken at declaration time.
    pub parameters: CodecParameters,
    /// Timebase chosen by the container, known once the header is written.
    pub container_time_base: Option<TimeBase>,
    pub last_pts: Option<i64>,
    pub last_dts: Option<i64>,
}

/// Running totals of what reached the container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuxerStatistics {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    /// Largest presentation time written so far, in seconds.
    pub duration: f64,
    pub header_written: bool,
    pub finalized: bool,
}

impl MuxerStatistics {
    pub fn total_packets(&self) -> u64 {
        self.video_packets + self.audio_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.video_bytes + self.audio_bytes
    }
}

impl std::fmt::Display for MuxerStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Muxer: {} video packets ({} bytes), {} audio packets ({} bytes), {:.3}s",
            self.video_packets, self.video_bytes, self.audio_packets, self.audio_bytes, self.duration
        )
    }
}

struct MuxerInner {
    state: MuxerState,
    writer: Option<Box<dyn ContainerWriter>>,
    slots: Vec<MuxerStreamSlot>,
    stats: MuxerStatistics,
}

pub struct Muxer {
    config: MuxerConfig,
    format: String,
    log: Logger,
    inner: Mutex<MuxerInner>,
}

impl Muxer {
    /// Resolve the output format and create the container writer.
    pub fn new(config: MuxerConfig, backend: &dyn MediaBackend, log: Logger) -> Result<Self> {
        let format = config
            .format_name()
            .ok_or_else(|| Error::CodecNotFound(config.describe_format()))?;
        if !backend.has_format(&format) {
            return Err(Error::CodecNotFound(format));
        }
        let writer = backend.create_writer(&config)?;
        let log = log.with_target("upcast::muxer");
        log_debug!(log, "Muxer ready: {} -> {}", format, config.output_path.display());

        Ok(Self {
            config,
            format,
            log,
            inner: Mutex::new(MuxerInner {
                state: MuxerState::Uninitialized,
                writer: Some(writer),
                slots: Vec::new(),
                stats: MuxerStatistics::default(),
            }),
        })
    }

    /// Whether the backend can write the named container.
    pub fn is_format_supported(backend: &dyn MediaBackend, name: &str) -> bool {
        backend.has_format(canonical_format(name))
    }

    /// Declare a stream; returns its index in the container.
    pub fn add_stream(&self, parameters: &CodecParameters, is_video: bool) -> Result<usize> {
        let mut inner = self.lock();
        let next = Self::advance(&inner, MuxerOp::AddStream)?;

        let kind = if is_video {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };
        if parameters.kind != kind {
            return Err(Error::InvalidConfig(format!(
                "{} parameters declared as a {} stream",
                parameters.kind, kind
            )));
        }

        let index = inner.slots.len();
        inner.slots.push(MuxerStreamSlot {
            index,
            kind,
            parameters: parameters.clone(),
            container_time_base: None,
            last_pts: None,
            last_dts: None,
        });
        inner.state = next;
        log_debug!(
            self.log,
            "Stream #{}: {} {} (timebase {})",
            index,
            kind,
            parameters.codec,
            parameters.time_base
        );
        Ok(index)
    }

    /// Write the container header; fails if no stream was declared.
    pub fn write_header(&self) -> Result<()> {
        let mut inner = self.lock();
        let next = Self::advance(&inner, MuxerOp::WriteHeader)?;

        let parameters: Vec<CodecParameters> =
            inner.slots.iter().map(|s| s.parameters.clone()).collect();
        let writer = inner
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("Muxer", "write the header", "released"))?;
        let time_bases = writer.write_header(&parameters)?;
        if time_bases.len() != parameters.len() {
            return Err(Error::Write(format!(
                "container returned {} timebases for {} streams",
                time_bases.len(),
                parameters.len()
            )));
        }

        for (slot, time_base) in inner.slots.iter_mut().zip(time_bases) {
            slot.container_time_base = Some(time_base);
        }
        inner.state = next;
        inner.stats.header_written = true;
        log_info!(
            self.log,
            "Wrote {} header with {} stream(s) to {}",
            self.format,
            inner.slots.len(),
            self.config.output_path.display()
        );
        Ok(())
    }

    /// Rescale `packet` into the container timebase of `stream_index` and write it.
    pub fn write_packet(&self, mut packet: Packet, stream_index: usize) -> Result<()> {
        let mut inner = self.lock();
        let next = Self::advance(&inner, MuxerOp::WritePacket)?;

        let slot = inner
            .slots
            .get(stream_index)
            .ok_or_else(|| Error::Write(format!("stream #{} was never declared", stream_index)))?;
        let target = slot.container_time_base.unwrap_or(packet.time_base);
        let kind = slot.kind;

        let (pts, dts) = Self::correct_timestamps(
            packet.pts.map(|v| packet.time_base.rescale(v, target)),
            packet.dts.map(|v| packet.time_base.rescale(v, target)),
            slot.last_dts,
        );
        packet.duration = packet.time_base.rescale(packet.duration, target);
        packet.pts = Some(pts);
        packet.dts = Some(dts);
        packet.time_base = target;
        packet.stream_index = stream_index;

        let size = packet.size() as u64;
        let writer = inner
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("Muxer", "write a packet", "released"))?;
        writer.write_packet(&packet)?;

        let slot = &mut inner.slots[stream_index];
        slot.last_pts = Some(pts);
        slot.last_dts = Some(dts);

        let stats = &mut inner.stats;
        match kind {
            MediaKind::Video => {
                stats.video_packets += 1;
                stats.video_bytes += size;
            }
            MediaKind::Audio => {
                stats.audio_packets += 1;
                stats.audio_bytes += size;
            }
        }
        stats.duration = stats.duration.max(target.to_seconds(pts));
        inner.state = next;
        Ok(())
    }

    /// Make the (PTS, DTS) pair writable: fill a missing value from the other,
    /// clamp DTS to PTS, then keep DTS strictly increasing.
    fn correct_timestamps(pts: Option<i64>, dts: Option<i64>, last_dts: Option<i64>) -> (i64, i64) {
        let fallback = last_dts.map_or(0, |last| last + 1);
        let pts = pts.or(dts).unwrap_or(fallback);
        let mut dts = dts.unwrap_or(pts).min(pts);
        if let Some(last) = last_dts
            && dts <= last
        {
            dts = last + 1;
        }
        (pts.max(dts), dts)
    }

    /// Write the trailer. Repeated calls, and calls before the header, are no-ops.
    pub fn finalize(&self) -> Result<()> {
        let mut inner = self.lock();
        let next = Self::advance(&inner, MuxerOp::Finalize)?;

        match inner.state {
            MuxerState::HeaderWritten => {
                inner.state = next;
                inner.stats.finalized = true;
                let result = match inner.writer.take() {
                    Some(mut writer) => writer.write_trailer(),
                    None => Ok(()),
                };
                log_info!(self.log, "{}", inner.stats);
                result
            }
            MuxerState::Closed => Ok(()),
            state => {
                log_warn!(
                    self.log,
                    "Finalize while {}: no header was written to {}",
                    state,
                    self.config.output_path.display()
                );
                Ok(())
            }
        }
    }

    pub fn state(&self) -> MuxerState {
        self.lock().state
    }

    pub fn statistics(&self) -> MuxerStatistics {
        self.lock().stats.clone()
    }

    pub fn stream_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn stream(&self, index: usize) -> Option<MuxerStreamSlot> {
        self.lock().slots.get(index).cloned()
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Resolved container name.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn output_path(&self) -> &Path {
        &self.config.output_path
    }

    fn advance(inner: &MuxerInner, op: MuxerOp) -> Result<MuxerState> {
        inner
            .state
            .apply(op)
            .ok_or_else(|| Error::invalid_state("Muxer", op.description(), inner.state))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MuxerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MuxEvent};
    use crate::media::{PixelFormat, SampleFormat};

    fn video_params() -> CodecParameters {
        CodecParameters::video("libx264", 64, 48, PixelFormat::Yuv420p, TimeBase::new(1, 30))
    }

    fn audio_params() -> CodecParameters {
        CodecParameters::audio(
            "aac",
            48_000,
            2,
            SampleFormat::Fltp,
            TimeBase::from_sample_rate(48_000),
        )
    }

    fn muxer(backend: &MemoryBackend, path: &str) -> Muxer {
        Muxer::new(MuxerConfig::new(path), backend, Logger::default()).unwrap()
    }

    #[test]
    fn test_header_requires_a_stream() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "a.mp4");
        assert!(matches!(
            muxer.write_header(),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(backend.output("a.mp4").unwrap().header_count(), 0);
    }

    #[test]
    fn test_add_stream_after_header_fails() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "b.mp4");
        assert_eq!(muxer.add_stream(&video_params(), true).unwrap(), 0);
        muxer.write_header().unwrap();
        assert!(matches!(
            muxer.add_stream(&audio_params(), false),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(muxer.stream_count(), 1);
    }

    #[test]
    fn test_packet_before_header_fails() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "c.mp4");
        muxer.add_stream(&video_params(), true).unwrap();
        let packet = Packet::new(vec![0u8; 4], TimeBase::new(1, 30)).with_pts(0);
        assert!(matches!(
            muxer.write_packet(packet, 0),
            Err(Error::InvalidState { .. })
        ));
        assert!(backend.output("c.mp4").unwrap().packets().is_empty());
    }

    #[test]
    fn test_finalize_twice_is_a_noop() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "d.mp4");
        muxer.add_stream(&video_params(), true).unwrap();
        muxer.write_header().unwrap();
        assert!(muxer.finalize().is_ok());
        assert!(muxer.finalize().is_ok());
        assert_eq!(muxer.state(), MuxerState::Closed);
        assert_eq!(backend.output("d.mp4").unwrap().trailer_count(), 1);

        let packet = Packet::new(vec![0u8; 4], TimeBase::new(1, 30)).with_pts(0);
        assert!(muxer.write_packet(packet, 0).is_err());
    }

    #[test]
    fn test_finalize_before_header_is_a_noop() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "e.mp4");
        assert!(muxer.finalize().is_ok());
        assert!(muxer.finalize().is_ok());
        assert_eq!(backend.output("e.mp4").unwrap().trailer_count(), 0);
        assert!(!muxer.statistics().finalized);
    }

    #[test]
    fn test_packets_are_rescaled_to_container_timebase() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "f.mp4");
        muxer.add_stream(&video_params(), true).unwrap();
        muxer.add_stream(&audio_params(), false).unwrap();
        muxer.write_header().unwrap();

        let video = Packet::new(vec![1u8; 10], TimeBase::new(1, 30))
            .with_pts(3)
            .with_dts(2)
            .with_duration(1);
        muxer.write_packet(video, 0).unwrap();
        let audio = Packet::new(vec![2u8; 6], TimeBase::from_sample_rate(48_000))
            .with_pts(1024)
            .with_dts(1024)
            .with_duration(1024);
        muxer.write_packet(audio, 1).unwrap();

        let packets = backend.output("f.mp4").unwrap().packets();
        assert_eq!(packets[0].pts, Some(9000));
        assert_eq!(packets[0].dts, Some(6000));
        assert_eq!(packets[0].duration, 3000);
        assert_eq!(packets[0].time_base, TimeBase::new(1, 90_000));
        assert_eq!(packets[1].stream_index, 1);
        assert_eq!(packets[1].pts, Some(1024));

        let stats = muxer.statistics();
        assert_eq!(stats.video_packets, 1);
        assert_eq!(stats.audio_bytes, 6);
        assert!((stats.duration - 0.1).abs() < 1e-9);
        assert!(stats.header_written);
    }

    #[test]
    fn test_dts_is_clamped_and_kept_increasing() {
        assert_eq!(Muxer::correct_timestamps(Some(5), Some(7), None), (5, 5));
        assert_eq!(Muxer::correct_timestamps(Some(5), Some(3), Some(3)), (5, 4));
        assert_eq!(Muxer::correct_timestamps(Some(3), Some(3), Some(3)), (4, 4));
        assert_eq!(Muxer::correct_timestamps(None, None, Some(9)), (10, 10));
        assert_eq!(Muxer::correct_timestamps(Some(2), None, None), (2, 2));
    }

    #[test]
    fn test_header_precedes_packets_in_output() {
        let backend = MemoryBackend::new();
        let config = MuxerConfig::new("g.mkv").with_format("");
        let muxer = Muxer::new(config, &backend, Logger::default()).unwrap();
        muxer.add_stream(&video_params(), true).unwrap();
        muxer.write_header().unwrap();
        for pts in 0..3 {
            let packet = Packet::new(vec![0u8; 2], TimeBase::new(1, 30)).with_pts(pts);
            muxer.write_packet(packet, 0).unwrap();
        }
        muxer.finalize().unwrap();

        let events = backend.output("g.mkv").unwrap().events();
        assert!(matches!(events.first(), Some(MuxEvent::Header { format, .. }) if format == "matroska"));
        assert!(matches!(events.last(), Some(MuxEvent::Trailer)));
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_format_resolution() {
        let guessed = MuxerConfig::new("out.mkv").with_format("");
        assert_eq!(guessed.format_name().as_deref(), Some("matroska"));
        assert_eq!(MuxerConfig::new("x").with_format("mkv").format_name().as_deref(), Some("matroska"));
        assert_eq!(MuxerConfig::new("out.xyz").with_format("").format_name(), None);

        let backend = MemoryBackend::new();
        assert!(Muxer::is_format_supported(&backend, "mkv"));
        assert!(!Muxer::is_format_supported(&backend, "webm"));
        let config = MuxerConfig::new("out.webm").with_format("webm");
        assert!(matches!(
            Muxer::new(config, &backend, Logger::default()),
            Err(Error::CodecNotFound(_))
        ));
    }

    #[test]
    fn test_mismatched_stream_kind_is_rejected() {
        let backend = MemoryBackend::new();
        let muxer = muxer(&backend, "h.mp4");
        assert!(muxer.add_stream(&audio_params(), true).is_err());
        assert_eq!(muxer.state(), MuxerState::Uninitialized);
    }
}
