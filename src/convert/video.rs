//! Pixel format conversion and scaling.

use crate::error::{Error, Result};
use crate::media::PixelFormat;
use serde::{Deserialize, Serialize};

/// Size and layout of a packed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Geometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.format.buffer_size(self.width, self.height)
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

/// Resampling filter used when the size changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// Conversion context for one (source, target) geometry pair.
///
/// Same-format conversions scale each plane directly; everything else goes
/// through an RGB intermediate (BT.601, limited range for YUV).
#[derive(Debug, Clone)]
pub struct PixelConverter {
    source: Geometry,
    target: Geometry,
    filter: ScaleFilter,
}

impl PixelConverter {
    pub fn new(source: Geometry, target: Geometry) -> Result<Self> {
        if source.width == 0 || source.height == 0 || target.width == 0 || target.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot convert {} to {}",
                source, target
            )));
        }
        Ok(Self {
            source,
            target,
            filter: ScaleFilter::default(),
        })
    }

    pub fn with_filter(mut self, filter: ScaleFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn source(&self) -> Geometry {
        self.source
    }

    pub fn target(&self) -> Geometry {
        self.target
    }

    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    pub fn convert(&self, src: &[u8]) -> Result<Vec<u8>> {
        let mut dst = vec![0; self.target.buffer_size()];
        self.convert_into(src, &mut dst)?;
        Ok(dst)
    }

    /// Convert a packed `source` image into a packed `target` buffer.
    pub fn convert_into(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let expected = self.source.buffer_size();
        if src.len() < expected {
            return Err(Error::InvalidConfig(format!(
                "{} image needs {} bytes, got {}",
                self.source,
                expected,
                src.len()
            )));
        }
        let needed = self.target.buffer_size();
        if dst.len() < needed {
            return Err(Error::InvalidConfig(format!(
                "{} image needs {} bytes, buffer has {}",
                self.target,
                needed,
                dst.len()
            )));
        }

        if self.is_identity() {
            dst[..needed].copy_from_slice(&src[..needed]);
            return Ok(());
        }

        if self.source.format == self.target.format {
            self.scale_planes(src, dst);
            return Ok(());
        }

        let rgb = to_rgb(src, self.source);
        let rgb = if self.source.width == self.target.width && self.source.height == self.target.height {
            rgb
        } else {
            let mut scaled = vec![0; self.target.width as usize * self.target.height as usize * 3];
            scale_plane(
                &rgb,
                (self.source.width as usize, self.source.height as usize),
                &mut scaled,
                (self.target.width as usize, self.target.height as usize),
                3,
                self.filter,
            );
            scaled
        };
        from_rgb(&rgb, self.target, dst);
        Ok(())
    }

    fn scale_planes(&self, src: &[u8], dst: &mut [u8]) {
        let format = self.source.format;
        let src_planes = format.planes(self.source.width, self.source.height);
        let dst_planes = format.planes(self.target.width, self.target.height);
        let channels = match format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => vec![3],
            PixelFormat::Gray => vec![1],
            PixelFormat::Yuv420p => vec![1, 1, 1],
            PixelFormat::Nv12 => vec![1, 2],
        };

        let (mut src_off, mut dst_off) = (0, 0);
        for ((&(src_row, src_rows), &(dst_row, dst_rows)), ch) in
            src_planes.iter().zip(&dst_planes).zip(channels)
        {
            scale_plane(
                &src[src_off..src_off + src_row * src_rows],
                (src_row / ch, src_rows),
                &mut dst[dst_off..dst_off + dst_row * dst_rows],
                (dst_row / ch, dst_rows),
                ch,
                self.filter,
            );
            src_off += src_row * src_rows;
            dst_off += dst_row * dst_rows;
        }
    }
}

/// Resize one interleaved plane of `channels` bytes per pixel.
fn scale_plane(
    src: &[u8],
    (sw, sh): (usize, usize),
    dst: &mut [u8],
    (dw, dh): (usize, usize),
    channels: usize,
    filter: ScaleFilter,
) {
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return;
    }
    if sw == dw && sh == dh {
        let n = sw * sh * channels;
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }

    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;

    match filter {
        ScaleFilter::Nearest => {
            for y in 0..dh {
                let sy = ((y as f32 * y_ratio) as usize).min(sh - 1);
                for x in 0..dw {
                    let sx = ((x as f32 * x_ratio) as usize).min(sw - 1);
                    let s = (sy * sw + sx) * channels;
                    let d = (y * dw + x) * channels;
                    dst[d..d + channels].copy_from_slice(&src[s..s + channels]);
                }
            }
        }
        ScaleFilter::Bilinear => {
            for y in 0..dh {
                let fy = ((y as f32 + 0.5) * y_ratio - 0.5).max(0.0);
                let y0 = (fy as usize).min(sh - 1);
                let y1 = (y0 + 1).min(sh - 1);
                let wy = fy - y0 as f32;
                for x in 0..dw {
                    let fx = ((x as f32 + 0.5) * x_ratio - 0.5).max(0.0);
                    let x0 = (fx as usize).min(sw - 1);
                    let x1 = (x0 + 1).min(sw - 1);
                    let wx = fx - x0 as f32;
                    for c in 0..channels {
                        let p = |xx: usize, yy: usize| src[(yy * sw + xx) * channels + c] as f32;
                        let top = p(x0, y0) * (1.0 - wx) + p(x1, y0) * wx;
                        let bottom = p(x0, y1) * (1.0 - wx) + p(x1, y1) * wx;
                        let value = top * (1.0 - wy) + bottom * wy;
                        dst[(y * dw + x) * channels + c] = value.round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
    }
}

#[inline]
fn clip(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clip((298 * c + 409 * e + 128) >> 8),
        clip((298 * c - 100 * d - 208 * e + 128) >> 8),
        clip((298 * c + 516 * d + 128) >> 8),
    ]
}

#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clip(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

#[inline]
fn rgb_to_uv(r: i32, g: i32, b: i32) -> (u8, u8) {
    (
        clip(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128),
        clip(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128),
    )
}

/// Expand a packed image into RGB24 at its own size.
fn to_rgb(src: &[u8], geometry: Geometry) -> Vec<u8> {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    let cw = w.div_ceil(2);
    let mut rgb = vec![0; w * h * 3];

    match geometry.format {
        PixelFormat::Rgb24 => rgb.copy_from_slice(&src[..w * h * 3]),
        PixelFormat::Bgr24 => {
            for (dst, px) in rgb.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                dst.copy_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        PixelFormat::Gray => {
            for (dst, &luma) in rgb.chunks_exact_mut(3).zip(src) {
                dst.fill(luma);
            }
        }
        PixelFormat::Yuv420p | PixelFormat::Nv12 => {
            let (luma, chroma) = src.split_at(w * h);
            let ch = h.div_ceil(2);
            for y in 0..h {
                for x in 0..w {
                    let (u, v) = if geometry.format == PixelFormat::Yuv420p {
                        let i = (y / 2) * cw + x / 2;
                        (chroma[i], chroma[cw * ch + i])
                    } else {
                        let i = (y / 2) * cw * 2 + (x / 2) * 2;
                        (chroma[i], chroma[i + 1])
                    };
                    let d = (y * w + x) * 3;
                    rgb[d..d + 3].copy_from_slice(&yuv_to_rgb(luma[y * w + x], u, v));
                }
            }
        }
    }
    rgb
}

/// Pack an RGB24 image of the target size into the target format.
fn from_rgb(rgb: &[u8], geometry: Geometry, dst: &mut [u8]) {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    match geometry.format {
        PixelFormat::Rgb24 => dst[..w * h * 3].copy_from_slice(rgb),
        PixelFormat::Bgr24 => {
            for (out, px) in dst.chunks_exact_mut(3).zip(rgb.chunks_exact(3)) {
                out.copy_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        PixelFormat::Gray => {
            for (out, px) in dst.iter_mut().zip(rgb.chunks_exact(3)) {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                *out = ((77 * r + 150 * g + 29 * b + 128) >> 8) as u8;
            }
        }
        PixelFormat::Yuv420p | PixelFormat::Nv12 => {
            let (luma, chroma) = dst.split_at_mut(w * h);
            for (i, px) in rgb.chunks_exact(3).enumerate() {
                luma[i] = rgb_to_y(px[0] as i32, px[1] as i32, px[2] as i32);
            }
            for cy in 0..ch {
                for cx in 0..cw {
                    // average the 2x2 block, clipped at the right/bottom edge
                    let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
                    for y in (cy * 2)..(cy * 2 + 2).min(h) {
                        for x in (cx * 2)..(cx * 2 + 2).min(w) {
                            let s = (y * w + x) * 3;
                            r += rgb[s] as i32;
                            g += rgb[s + 1] as i32;
                            b += rgb[s + 2] as i32;
                            n += 1;
                        }
                    }
                    let (u, v) = rgb_to_uv(r / n, g / n, b / n);
                    if geometry.format == PixelFormat::Yuv420p {
                        chroma[cy * cw + cx] = u;
                        chroma[cw * ch + cy * cw + cx] = v;
                    } else {
                        let i = cy * cw * 2 + cx * 2;
                        chroma[i] = u;
                        chroma[i + 1] = v;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(w: usize, h: usize, px: [u8; 3]) -> Vec<u8> {
        px.iter().copied().cycle().take(w * h * 3).collect()
    }

    #[test]
    fn test_identity_copies() {
        let geometry = Geometry::new(2, 2, PixelFormat::Gray);
        let converter = PixelConverter::new(geometry, geometry).unwrap();
        assert!(converter.is_identity());
        assert_eq!(converter.convert(&[1, 2, 3, 4]).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rgb_bgr_swap() {
        let converter = PixelConverter::new(
            Geometry::new(1, 1, PixelFormat::Rgb24),
            Geometry::new(1, 1, PixelFormat::Bgr24),
        )
        .unwrap();
        assert_eq!(converter.convert(&[10, 20, 30]).unwrap(), vec![30, 20, 10]);
    }

    #[test]
    fn test_yuv_round_trip_is_close() {
        let rgb = solid_rgb(4, 4, [200, 100, 50]);
        let to_yuv = PixelConverter::new(
            Geometry::new(4, 4, PixelFormat::Rgb24),
            Geometry::new(4, 4, PixelFormat::Yuv420p),
        )
        .unwrap();
        let yuv = to_yuv.convert(&rgb).unwrap();
        assert_eq!(yuv.len(), 24);

        let back = PixelConverter::new(to_yuv.target(), to_yuv.source())
            .unwrap()
            .convert(&yuv)
            .unwrap();
        for (a, b) in rgb.iter().zip(&back) {
            assert!((*a as i32 - *b as i32).abs() <= 3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_nv12_matches_yuv420p() {
        let rgb = solid_rgb(2, 2, [0, 255, 0]);
        let source = Geometry::new(2, 2, PixelFormat::Rgb24);
        let planar = PixelConverter::new(source, Geometry::new(2, 2, PixelFormat::Yuv420p))
            .unwrap()
            .convert(&rgb)
            .unwrap();
        let semi = PixelConverter::new(source, Geometry::new(2, 2, PixelFormat::Nv12))
            .unwrap()
            .convert(&rgb)
            .unwrap();
        assert_eq!(planar[..4], semi[..4]);
        assert_eq!(planar[4], semi[4]);
        assert_eq!(planar[5], semi[5]);
    }

    #[test]
    fn test_nearest_upscale_duplicates_pixels() {
        let converter = PixelConverter::new(
            Geometry::new(2, 1, PixelFormat::Gray),
            Geometry::new(4, 2, PixelFormat::Gray),
        )
        .unwrap()
        .with_filter(ScaleFilter::Nearest);
        assert_eq!(
            converter.convert(&[10, 20]).unwrap(),
            vec![10, 10, 20, 20, 10, 10, 20, 20]
        );
    }

    #[test]
    fn test_bilinear_keeps_solid_color() {
        let converter = PixelConverter::new(
            Geometry::new(3, 3, PixelFormat::Yuv420p),
            Geometry::new(6, 6, PixelFormat::Yuv420p),
        )
        .unwrap();
        let src = vec![90; PixelFormat::Yuv420p.buffer_size(3, 3)];
        let out = converter.convert(&src).unwrap();
        assert_eq!(out.len(), PixelFormat::Yuv420p.buffer_size(6, 6));
        assert!(out.iter().all(|&v| v == 90));
    }

    #[test]
    fn test_rejects_short_input_and_empty_geometry() {
        let converter = PixelConverter::new(
            Geometry::new(2, 2, PixelFormat::Rgb24),
            Geometry::new(2, 2, PixelFormat::Gray),
        )
        .unwrap();
        assert!(converter.convert(&[0; 5]).is_err());
        assert!(
            PixelConverter::new(
                Geometry::new(0, 2, PixelFormat::Rgb24),
                Geometry::new(2, 2, PixelFormat::Gray)
            )
            .is_err()
        );
    }
}
