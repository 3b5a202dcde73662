//! Compressed packets.

use crate::media::TimeBase;
use bytes::Bytes;

/// A compressed packet belonging to one elementary stream.
///
/// Timestamps are expressed in `time_base`; the muxer rescales them into the
/// container timebase before writing.
#[derive(Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Duration in `time_base` ticks, 0 when unknown.
    pub duration: i64,
    pub time_base: TimeBase,
    pub stream_index: usize,
    pub key: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, time_base: TimeBase) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            time_base,
            stream_index: 0,
            key: false,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("time_base", &self.time_base)
            .field("key", &self.key)
            .field("size", &self.size())
            .finish()
    }
}
