//! Format-conversion contexts shared by decoders, encoders and enhancers.

pub mod audio;
pub mod video;

pub use audio::{AudioLayout, SampleConverter};
pub use video::{Geometry, PixelConverter, ScaleFilter};
