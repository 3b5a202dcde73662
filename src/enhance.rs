//! Frame enhancement hand-off.
//!
//! An enhancer is an `Image -> Image` function that may enlarge the picture.
//! [`enhance_frame`] is the only place the pipeline calls one: it shields the
//! pipeline from enhancer failures (errors and panics alike), validates the
//! returned image and carries the frame timing over.

use crate::convert::{Geometry, PixelConverter, ScaleFilter};
use crate::error::{Error, Result};
use crate::media::{PixelFormat, VideoFrame};
use std::panic::{self, AssertUnwindSafe};

/// Packed picture handed to an enhancer.
#[derive(Clone, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Image {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("size", &self.data.len())
            .finish()
    }
}

/// External enhancement stage.
pub trait FrameEnhancer: Send {
    /// Short tag appended to the frame's source label.
    fn name(&self) -> &str;

    /// Return an image at least as large as `image`.
    fn enhance(&mut self, image: Image) -> anyhow::Result<Image>;
}

/// Returns the image unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FrameEnhancer for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn enhance(&mut self, image: Image) -> anyhow::Result<Image> {
        Ok(image)
    }
}

/// Plain interpolating upscaler by an integer factor.
#[derive(Debug, Clone)]
pub struct Upscale {
    factor: u32,
    filter: ScaleFilter,
    name: String,
    converter: Option<PixelConverter>,
}

impl Upscale {
    pub fn new(factor: u32, filter: ScaleFilter) -> Self {
        let factor = factor.max(1);
        Self {
            factor,
            filter,
            name: format!("x{}", factor),
            converter: None,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }
}

impl FrameEnhancer for Upscale {
    fn name(&self) -> &str {
        &self.name
    }

    fn enhance(&mut self, image: Image) -> anyhow::Result<Image> {
        if self.factor == 1 {
            return Ok(image);
        }
        let source = Geometry::new(image.width, image.height, image.format);
        let target = Geometry::new(
            image.width * self.factor,
            image.height * self.factor,
            image.format,
        );
        if self.converter.as_ref().map(|c| c.source()) != Some(source) {
            self.converter = Some(PixelConverter::new(source, target)?.with_filter(self.filter));
        }
        let converter = self
            .converter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no scaler for {}", source))?;
        let data = converter.convert(&image.data)?;
        Ok(Image::new(data, target.width, target.height, target.format))
    }
}

/// Run `enhancer` on `frame` and rebuild the frame around the result.
///
/// Timestamps and index are kept, dimensions follow the enhanced image and
/// `+<name>` is appended to the source label.
pub fn enhance_frame(enhancer: &mut dyn FrameEnhancer, frame: VideoFrame) -> Result<VideoFrame> {
    let name = enhancer.name().to_string();
    let VideoFrame {
        data,
        width,
        height,
        format,
        pts,
        raw_pts,
        index,
        source,
    } = frame;

    let input = Image::new(data, width, height, format);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| enhancer.enhance(input)));
    let image = match outcome {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            return Err(Error::Enhance {
                name,
                reason: format!("{:#}", e),
            });
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("unknown panic"));
            return Err(Error::Enhance {
                name,
                reason: format!("panicked: {}", reason),
            });
        }
    };

    if image.width < width || image.height < height {
        return Err(Error::Enhance {
            name,
            reason: format!(
                "returned {}x{}, smaller than the {}x{} input",
                image.width, image.height, width, height
            ),
        });
    }
    if !image.is_consistent() {
        return Err(Error::Enhance {
            name,
            reason: format!(
                "returned {} bytes for a {}x{} {} image",
                image.data.len(),
                image.width,
                image.height,
                image.format
            ),
        });
    }

    Ok(VideoFrame {
        data: image.data,
        width: image.width,
        height: image.height,
        format: image.format,
        pts,
        raw_pts,
        index,
        source: format!("{}+{}", source, name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> VideoFrame {
        let size = PixelFormat::Rgb24.buffer_size(width, height);
        VideoFrame::new(vec![100; size], width, height, PixelFormat::Rgb24).with_timing(1.5, 135_000, 45)
    }

    struct Failing;

    impl FrameEnhancer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn enhance(&mut self, _image: Image) -> anyhow::Result<Image> {
            anyhow::bail!("model not loaded")
        }
    }

    struct Panicking;

    impl FrameEnhancer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn enhance(&mut self, _image: Image) -> anyhow::Result<Image> {
            panic!("tensor shape mismatch")
        }
    }

    struct Shrinking;

    impl FrameEnhancer for Shrinking {
        fn name(&self) -> &str {
            "shrinking"
        }

        fn enhance(&mut self, image: Image) -> anyhow::Result<Image> {
            Ok(Image::new(vec![0; 3], 1, 1, image.format))
        }
    }

    #[test]
    fn test_passthrough_tags_source() {
        let out = enhance_frame(&mut Passthrough, frame(4, 2)).unwrap();
        assert_eq!(out.source, "video+passthrough");
        assert_eq!((out.width, out.height), (4, 2));
        assert_eq!(out.pts, 1.5);
        assert_eq!(out.raw_pts, 135_000);
        assert_eq!(out.index, 45);
    }

    #[test]
    fn test_upscale_doubles_dimensions() {
        let mut upscale = Upscale::new(2, ScaleFilter::Nearest);
        let out = enhance_frame(&mut upscale, frame(4, 2)).unwrap();
        assert_eq!((out.width, out.height), (8, 4));
        assert!(out.is_consistent());
        assert!(out.data.iter().all(|&b| b == 100));
        assert_eq!(out.source, "video+x2");
        assert_eq!(out.pts, 1.5);
    }

    #[test]
    fn test_enhancer_errors_become_pipeline_errors() {
        let err = enhance_frame(&mut Failing, frame(2, 2)).unwrap_err();
        assert!(matches!(&err, Error::Enhance { name, reason } if name == "failing" && reason.contains("model not loaded")));

        let err = enhance_frame(&mut Panicking, frame(2, 2)).unwrap_err();
        assert!(matches!(&err, Error::Enhance { reason, .. } if reason.contains("tensor shape mismatch")));
    }

    #[test]
    fn test_smaller_output_is_rejected() {
        assert!(matches!(
            enhance_frame(&mut Shrinking, frame(2, 2)),
            Err(Error::Enhance { .. })
        ));
    }
}
