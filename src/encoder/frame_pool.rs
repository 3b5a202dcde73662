use crate::media::{NativeVideo, PixelFormat};
use std::collections::VecDeque;

/// Frame pool for reusing native frame buffers across `encode` calls.
///
/// - Pre-allocates frames on creation
/// - Reuses frames via put()/take() cycle
/// - Falls back to allocation if the pool is exhausted
pub(crate) struct FramePool {
    frames: VecDeque<NativeVideo>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// Initial number of frames to pre-allocate in the pool
const INITIAL_POOL_SIZE: usize = 4;

impl FramePool {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let frames = (0..INITIAL_POOL_SIZE)
            .map(|_| NativeVideo::blank(width, height, pixel_format))
            .collect();
        Self {
            frames,
            width,
            height,
            pixel_format,
        }
    }

    /// Put a frame back after the codec is done with it.
    #[inline]
    pub fn put(&mut self, mut frame: NativeVideo) {
        let fits = frame.width == self.width
            && frame.height == self.height
            && frame.format == self.pixel_format;
        // keep the pool bounded
        if fits && self.frames.len() < INITIAL_POOL_SIZE * 2 {
            frame.pts = None;
            self.frames.push_back(frame);
        }
    }

    /// Take a frame from the pool or allocate a new one.
    #[inline]
    pub fn take(&mut self) -> NativeVideo {
        self.frames
            .pop_front()
            .unwrap_or_else(|| NativeVideo::blank(self.width, self.height, self.pixel_format))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }
}
