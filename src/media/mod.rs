//! Media data model: frames, packets, timebases and formats.

mod format;
mod frame;
mod native;
mod packet;
mod stream;
mod time;

pub use format::{PixelFormat, SampleFormat};
pub use frame::{AudioFrame, Frame, MediaKind, VideoFrame};
pub use native::{NativeAudio, NativeFrame, NativeVideo, Plane};
pub use packet::Packet;
pub use stream::{CodecParameters, StreamMetadata};
pub use time::TimeBase;
