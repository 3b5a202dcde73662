//! Timestamp-ordered merge of the video and audio streams.
//!
//! Frames are pushed per stream in decode order (which is timestamp order by
//! construction) and pulled out as a single non-decreasing sequence: a plain
//! two-way merge over the queue heads, video first on ties.

use crate::error::{Error, Result};
use crate::media::{AudioFrame, Frame, VideoFrame};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct SyncScheduler {
    /// Video frames in arrival order
    video_queue: VecDeque<VideoFrame>,
    /// Audio frames in arrival order
    audio_queue: VecDeque<AudioFrame>,
    released_video: u64,
    released_audio: u64,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_video(&mut self, frame: VideoFrame) {
        self.video_queue.push_back(frame);
    }

    pub fn push_audio(&mut self, frame: AudioFrame) {
        self.audio_queue.push_back(frame);
    }

    /// Push either kind of frame.
    pub fn push(&mut self, frame: Frame) {
        match frame {
            Frame::Video(frame) => self.push_video(frame),
            Frame::Audio(frame) => self.push_audio(frame),
        }
    }

    pub fn has_next(&self) -> bool {
        !self.video_queue.is_empty() || !self.audio_queue.is_empty()
    }

    /// Pop the frame with the smallest timestamp; video wins ties.
    pub fn pop_next(&mut self) -> Result<Frame> {
        if self.video_is_next() {
            if let Some(frame) = self.video_queue.pop_front() {
                self.released_video += 1;
                return Ok(Frame::Video(frame));
            }
        } else if let Some(frame) = self.audio_queue.pop_front() {
            self.released_audio += 1;
            return Ok(Frame::Audio(frame));
        }
        Err(Error::EmptyQueues)
    }

    /// Streaming variant of [`pop_next`](Self::pop_next): only release the head
    /// when no later push can precede it, i.e. the other queue holds a frame or
    /// its stream is finished.
    pub fn pop_ready(&mut self, video_open: bool, audio_open: bool) -> Option<Frame> {
        let ready = match (self.video_queue.is_empty(), self.audio_queue.is_empty()) {
            (true, true) => false,
            (false, false) => true,
            (false, true) => !audio_open,
            (true, false) => !video_open,
        };
        if ready { self.pop_next().ok() } else { None }
    }

    /// Timestamp `pop_next` would return, `None` when both queues are empty.
    pub fn next_timestamp(&self) -> Option<f64> {
        match (self.video_front(), self.audio_front()) {
            (f64::INFINITY, f64::INFINITY) => None,
            (video, audio) => Some(video.min(audio)),
        }
    }

    pub fn clear(&mut self) {
        self.video_queue.clear();
        self.audio_queue.clear();
    }

    pub fn video_len(&self) -> usize {
        self.video_queue.len()
    }

    pub fn audio_len(&self) -> usize {
        self.audio_queue.len()
    }

    pub fn len(&self) -> usize {
        self.video_queue.len() + self.audio_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_next()
    }

    /// Frames handed out so far, as `(video, audio)`.
    pub fn released(&self) -> (u64, u64) {
        (self.released_video, self.released_audio)
    }

    fn video_is_next(&self) -> bool {
        let video = self.video_front();
        video != f64::INFINITY && video <= self.audio_front()
    }

    // an empty queue's front is +inf
    fn video_front(&self) -> f64 {
        self.video_queue.front().map_or(f64::INFINITY, |f| f.pts)
    }

    fn audio_front(&self) -> f64 {
        self.audio_queue.front().map_or(f64::INFINITY, |f| f.pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, PixelFormat, SampleFormat};

    fn video(pts: f64, index: u64) -> VideoFrame {
        VideoFrame::new(vec![0; 3], 1, 1, PixelFormat::Rgb24).with_timing(pts, 0, index)
    }

    fn audio(pts: f64, index: u64) -> AudioFrame {
        AudioFrame::new(vec![0; 4], 48_000, 2, 1, SampleFormat::S16).with_timing(pts, 0, index)
    }

    #[test]
    fn test_merge_yields_sorted_sequence() {
        let video_pts = [0.0, 0.033, 0.066, 0.1, 0.5];
        let audio_pts = [0.0, 0.021, 0.042, 0.064, 0.085, 0.106, 0.9];

        let mut scheduler = SyncScheduler::new();
        for (i, pts) in video_pts.iter().enumerate() {
            scheduler.push_video(video(*pts, i as u64));
        }
        for (i, pts) in audio_pts.iter().enumerate() {
            scheduler.push_audio(audio(*pts, i as u64));
        }

        let mut out = Vec::new();
        while scheduler.has_next() {
            out.push(scheduler.pop_next().unwrap());
        }
        assert_eq!(out.len(), video_pts.len() + audio_pts.len());
        assert!(out.windows(2).all(|w| w[0].pts() <= w[1].pts()));

        // every frame comes from its own queue, in its own order
        let video_indices: Vec<u64> = out
            .iter()
            .filter_map(|f| f.as_video().ok().map(|v| v.index))
            .collect();
        let audio_indices: Vec<u64> = out
            .iter()
            .filter_map(|f| f.as_audio().ok().map(|a| a.index))
            .collect();
        assert_eq!(video_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(audio_indices, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(scheduler.released(), (5, 7));
    }

    #[test]
    fn test_video_wins_ties() {
        let mut scheduler = SyncScheduler::new();
        scheduler.push_audio(audio(1.0, 0));
        scheduler.push_video(video(1.0, 0));

        assert_eq!(scheduler.pop_next().unwrap().kind(), MediaKind::Video);
        assert_eq!(scheduler.pop_next().unwrap().kind(), MediaKind::Audio);
    }

    #[test]
    fn test_empty_queues() {
        let mut scheduler = SyncScheduler::new();
        assert!(!scheduler.has_next());
        assert_eq!(scheduler.next_timestamp(), None);
        assert!(matches!(scheduler.pop_next(), Err(Error::EmptyQueues)));
    }

    #[test]
    fn test_next_timestamp_and_clear() {
        let mut scheduler = SyncScheduler::new();
        scheduler.push_video(video(0.5, 0));
        scheduler.push_audio(audio(0.25, 0));
        assert_eq!(scheduler.next_timestamp(), Some(0.25));
        assert_eq!((scheduler.video_len(), scheduler.audio_len()), (1, 1));

        scheduler.clear();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_timestamp(), None);
    }

    #[test]
    fn test_pop_ready_waits_for_open_streams() {
        let mut scheduler = SyncScheduler::new();
        scheduler.push_video(video(0.0, 0));
        assert!(scheduler.pop_ready(true, true).is_none());

        scheduler.push_audio(audio(0.0, 0));
        assert!(scheduler.pop_ready(true, true).unwrap().is_video());
        // only audio left while video may still deliver
        assert!(scheduler.pop_ready(true, true).is_none());
        assert!(scheduler.pop_ready(false, true).unwrap().is_audio());
        assert!(scheduler.pop_ready(false, false).is_none());
    }
}
