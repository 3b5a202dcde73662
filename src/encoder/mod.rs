//! Video and audio encoders
//!
//! Encoders take frames in presentation order, convert them to the codec's
//! layout when needed, stamp them from a running frame/sample counter and
//! return whatever packets the codec emits.

mod audio;
mod frame_pool;
mod video;

pub use audio::{AudioEncoder, AudioEncoderConfig};
pub use video::{VideoEncoder, VideoEncoderConfig};

pub(crate) use frame_pool::FramePool;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate-control policy; the two modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    /// Target bits per second.
    Bitrate(u64),
    /// Constant quality factor (CRF-like); 0 is lossless.
    Quality(u32),
}

impl Default for RateControl {
    fn default() -> Self {
        RateControl::Quality(23)
    }
}

impl std::fmt::Display for RateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateControl::Bitrate(bps) => write!(f, "{} kb/s", bps / 1000),
            RateControl::Quality(0) => write!(f, "lossless"),
            RateControl::Quality(q) => write!(f, "quality {}", q),
        }
    }
}

/// Counters of one encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderStatistics {
    pub frames_encoded: u64,
    pub packets: u64,
    pub bytes: u64,
    /// Time spent inside the codec.
    pub encode_time: Duration,
}

impl EncoderStatistics {
    /// Average codec time per frame, in milliseconds.
    pub fn avg_encode_ms(&self) -> f64 {
        if self.frames_encoded == 0 {
            return 0.0;
        }
        self.encode_time.as_secs_f64() * 1000.0 / self.frames_encoded as f64
    }
}

impl std::fmt::Display for EncoderStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames -> {} packets, {} bytes, avg {:.2}ms/frame",
            self.frames_encoded,
            self.packets,
            self.bytes,
            self.avg_encode_ms()
        )
    }
}
