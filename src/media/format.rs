//! Pixel and sample format tags.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pixel layouts the pipeline can produce and consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// Single 8-bit luma plane.
    Gray,
    /// Planar Y, U, V with 2x2 chroma subsampling.
    Yuv420p,
    /// Y plane followed by interleaved UV with 2x2 subsampling.
    Nv12,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 5] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Gray,
        PixelFormat::Yuv420p,
        PixelFormat::Nv12,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Gray => "gray",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// `(row bytes, rows)` of every plane for a `width`x`height` image.
    pub fn planes(self, width: u32, height: u32) -> Vec<(usize, usize)> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => vec![(w * 3, h)],
            PixelFormat::Gray => vec![(w, h)],
            PixelFormat::Yuv420p => vec![(w, h), (cw, ch), (cw, ch)],
            PixelFormat::Nv12 => vec![(w, h), (cw * 2, ch)],
        }
    }

    /// Size of a tightly packed image in this format.
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        self.planes(width, height)
            .into_iter()
            .map(|(row, rows)| row * rows)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::InvalidConfig(format!("unknown pixel format {s}")))
    }
}

/// Audio sample layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Interleaved signed 16-bit.
    S16,
    /// Interleaved 32-bit float.
    Flt,
    /// Planar signed 16-bit.
    S16p,
    /// Planar 32-bit float.
    Fltp,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 4] = [
        SampleFormat::S16,
        SampleFormat::Flt,
        SampleFormat::S16p,
        SampleFormat::Fltp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::S16 => "s16",
            SampleFormat::Flt => "flt",
            SampleFormat::S16p => "s16p",
            SampleFormat::Fltp => "fltp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 | SampleFormat::S16p => 2,
            SampleFormat::Flt | SampleFormat::Fltp => 4,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, SampleFormat::S16p | SampleFormat::Fltp)
    }

    /// Interleaved counterpart of a planar format.
    pub fn packed(self) -> Self {
        match self {
            SampleFormat::S16p => SampleFormat::S16,
            SampleFormat::Fltp => SampleFormat::Flt,
            other => other,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::InvalidConfig(format!("unknown sample format {s}")))
    }
}
