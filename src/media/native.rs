//! Decoded frames in the layout a backend hands over or expects.
//!
//! Native video frames keep one buffer per plane with an explicit stride (row
//! padding is allowed); native audio frames keep one buffer per plane for planar
//! formats and a single buffer for interleaved ones. The packed [`VideoFrame`]s
//! and [`AudioFrame`]s flowing through the pipeline are produced from these by
//! the decoders and turned back into them by the encoders.
//!
//! [`VideoFrame`]: crate::media::VideoFrame
//! [`AudioFrame`]: crate::media::AudioFrame

use crate::media::{PixelFormat, SampleFormat};

/// One image plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two consecutive rows.
    pub stride: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeVideo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    /// Timestamp in the owning stream's timebase.
    pub pts: Option<i64>,
}

impl NativeVideo {
    /// Zero-filled frame with tightly packed planes.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = format
            .planes(width, height)
            .into_iter()
            .map(|(row, rows)| Plane {
                data: vec![0; row * rows],
                stride: row,
            })
            .collect();
        Self {
            width,
            height,
            format,
            planes,
            pts: None,
        }
    }

    /// Split a tightly packed buffer into planes.
    ///
    /// Returns `None` if `data` is shorter than the geometry requires.
    pub fn from_packed(data: &[u8], width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        if data.len() < format.buffer_size(width, height) {
            return None;
        }
        let mut offset = 0;
        let mut planes = Vec::new();
        for (row, rows) in format.planes(width, height) {
            let size = row * rows;
            planes.push(Plane {
                data: data[offset..offset + size].to_vec(),
                stride: row,
            });
            offset += size;
        }
        Some(Self {
            width,
            height,
            format,
            planes,
            pts: None,
        })
    }

    /// Copy all planes into a single contiguous buffer, stripping stride padding.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = vec![0; self.format.buffer_size(self.width, self.height)];
        self.pack_into(&mut out);
        out
    }

    /// Same as [`to_packed`](Self::to_packed), writing into an existing buffer.
    pub fn pack_into(&self, dst: &mut [u8]) {
        let mut offset = 0;
        for ((row, rows), plane) in self
            .format
            .planes(self.width, self.height)
            .into_iter()
            .zip(&self.planes)
        {
            let size = row * rows;
            if offset + size > dst.len() {
                break;
            }
            extract_plane(&mut dst[offset..offset + size], &plane.data, plane.stride, row, rows);
            offset += size;
        }
    }

    /// Overwrite the planes from a tightly packed buffer.
    pub fn fill_from_packed(&mut self, src: &[u8]) {
        let mut offset = 0;
        for ((row, rows), plane) in self
            .format
            .planes(self.width, self.height)
            .into_iter()
            .zip(self.planes.iter_mut())
        {
            let size = row * rows;
            if offset + size > src.len() {
                break;
            }
            insert_plane(&mut plane.data, plane.stride, &src[offset..offset + size], row, rows);
            offset += size;
        }
    }
}

/// Extract a plane from padded source to contiguous destination.
///
/// Fast path: no padding means a single memcpy, otherwise row by row.
#[inline]
pub(crate) fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    let total = width * height;

    if stride == width && src.len() >= total && dst.len() >= total {
        dst[..total].copy_from_slice(&src[..total]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}

/// Inverse of [`extract_plane`]: spread contiguous rows into a padded plane.
#[inline]
pub(crate) fn insert_plane(dst: &mut [u8], stride: usize, src: &[u8], width: usize, height: usize) {
    let total = width * height;

    if stride == width && src.len() >= total && dst.len() >= total {
        dst[..total].copy_from_slice(&src[..total]);
        return;
    }

    for r in 0..height {
        let src_start = r * width;
        let dst_start = r * stride;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel.
    pub samples: usize,
    pub format: SampleFormat,
    /// One buffer per channel for planar formats, a single buffer otherwise.
    pub planes: Vec<Vec<u8>>,
    pub pts: Option<i64>,
}

impl NativeAudio {
    /// Wrap an interleaved buffer.
    pub fn interleaved(
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> Self {
        let frame_bytes = format.bytes_per_sample() * channels.max(1) as usize;
        Self {
            sample_rate,
            channels,
            samples: data.len() / frame_bytes,
            format,
            planes: vec![data],
            pts: None,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }
}

/// Decoded frame of either media type.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeFrame {
    Video(NativeVideo),
    Audio(NativeAudio),
}

impl NativeFrame {
    pub fn pts(&self) -> Option<i64> {
        match self {
            NativeFrame::Video(frame) => frame.pts,
            NativeFrame::Audio(frame) => frame.pts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_strips_padding() {
        // 2x2 gray image stored with a stride of 4
        let frame = NativeVideo {
            width: 2,
            height: 2,
            format: PixelFormat::Gray,
            planes: vec![Plane {
                data: vec![1, 2, 0, 0, 3, 4, 0, 0],
                stride: 4,
            }],
            pts: None,
        };
        assert_eq!(frame.to_packed(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_fill_respects_stride() {
        let mut frame = NativeVideo::blank(2, 2, PixelFormat::Gray);
        frame.planes[0] = Plane {
            data: vec![9; 8],
            stride: 4,
        };
        frame.fill_from_packed(&[1, 2, 3, 4]);
        assert_eq!(frame.planes[0].data, vec![1, 2, 9, 9, 3, 4, 9, 9]);
    }

    #[test]
    fn test_from_packed_splits_yuv_planes() {
        let data: Vec<u8> = (0..6).collect();
        let frame = NativeVideo::from_packed(&data, 2, 2, PixelFormat::Yuv420p).unwrap();
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].data, vec![0, 1, 2, 3]);
        assert_eq!(frame.planes[1].data, vec![4]);
        assert_eq!(frame.planes[2].data, vec![5]);
        assert_eq!(frame.to_packed(), data);

        assert!(NativeVideo::from_packed(&data[..5], 2, 2, PixelFormat::Yuv420p).is_none());
    }

    #[test]
    fn test_interleaved_sample_count() {
        let audio = NativeAudio::interleaved(vec![0; 4096], 48_000, 2, SampleFormat::S16);
        assert_eq!(audio.samples, 1024);
        assert_eq!(audio.planes.len(), 1);
    }
}
