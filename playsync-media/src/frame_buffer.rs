//! Decoded video frames awaiting display

use crate::frame::DecodedVideoFrame;
use std::collections::VecDeque;
use tracing::trace;

/// Counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    /// Frames pushed by the decoder side
    pub frames_pushed: u64,
    /// Frames released as stale or on clear
    pub frames_released: u64,
    /// Selections that found a frame
    pub selections: u64,
}

/// Frame chosen for display this tick
#[derive(Debug)]
pub struct FrameSelection<'a> {
    /// Stale frames released ahead of the chosen one
    pub evicted: usize,
    /// Frame to draw, now at the front of the buffer
    pub frame: &'a DecodedVideoFrame,
}

/// Ordered buffer of decoded video frames
///
/// The buffer does not cap its length; the video decode scheduler stops
/// feeding once `target` frames are ready.
#[derive(Debug)]
pub struct VideoFrameBuffer {
    frames: VecDeque<DecodedVideoFrame>,
    target: usize,
    stats: FrameBufferStats,
}

impl VideoFrameBuffer {
    /// Create an empty buffer with the given ready-frame target
    pub fn new(target: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(target + 1),
            target,
            stats: FrameBufferStats::default(),
        }
    }

    /// Append a decoded frame
    pub fn push(&mut self, frame: DecodedVideoFrame) {
        trace!(timestamp_us = frame.timestamp_micros, "Buffering video frame");
        self.stats.frames_pushed += 1;
        self.frames.push_back(frame);
    }

    /// Pick the frame closest to `clock_micros` and release everything before it
    ///
    /// Ties go to the earlier frame. Returns `None` on an empty buffer.
    pub fn select(&mut self, clock_micros: i64) -> Option<FrameSelection<'_>> {
        let index = self.closest_index(clock_micros)?;

        for _ in 0..index {
            if let Some(stale) = self.frames.pop_front() {
                stale.release();
                self.stats.frames_released += 1;
            }
        }
        self.stats.selections += 1;

        self.frames.front().map(|frame| FrameSelection {
            evicted: index,
            frame,
        })
    }

    fn closest_index(&self, clock_micros: i64) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, frame) in self.frames.iter().enumerate() {
            let delta = frame.timestamp_micros.abs_diff(clock_micros);
            match best {
                Some((_, best_delta)) if delta >= best_delta => {}
                _ => best = Some((index, delta)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Release every buffered frame; returns how many were released
    pub fn clear(&mut self) -> usize {
        let released = self.frames.len();
        for frame in self.frames.drain(..) {
            frame.release();
        }
        self.stats.frames_released += released as u64;
        released
    }

    /// Buffered frame count
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is buffered
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether the ready-frame target has been reached
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.target
    }

    /// Ready-frame target
    pub fn target(&self) -> usize {
        self.target
    }

    /// Timestamps of the buffered frames, front first
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.iter().map(|f| f.timestamp_micros)
    }

    /// Counter snapshot
    pub fn stats(&self) -> FrameBufferStats {
        self.stats.clone()
    }
}

impl Drop for VideoFrameBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(ts: i64) -> DecodedVideoFrame {
        DecodedVideoFrame::new(ts, 4, 4, Bytes::new())
    }

    #[test]
    fn test_tie_goes_to_earlier_frame() {
        let mut buffer = VideoFrameBuffer::new(3);
        buffer.push(frame(0));
        buffer.push(frame(100));
        buffer.push(frame(200));

        let selection = buffer.select(150).unwrap();
        assert_eq!(selection.evicted, 1);
        assert_eq!(selection.frame.timestamp_micros, 100);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clock_before_first_frame_evicts_nothing() {
        let mut buffer = VideoFrameBuffer::new(3);
        buffer.push(frame(1_000));
        buffer.push(frame(2_000));

        let selection = buffer.select(-500).unwrap();
        assert_eq!(selection.evicted, 0);
        assert_eq!(selection.frame.timestamp_micros, 1_000);
    }

    #[test]
    fn test_clock_past_last_frame_keeps_singleton() {
        let mut buffer = VideoFrameBuffer::new(3);
        for ts in [0, 40_000, 80_000] {
            buffer.push(frame(ts));
        }

        let selection = buffer.select(1_000_000).unwrap();
        assert_eq!(selection.evicted, 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().frames_released, 2);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut buffer = VideoFrameBuffer::new(3);
        for ts in 0..5 {
            buffer.push(frame(ts));
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.clear(), 5);
        assert!(buffer.is_empty());
        assert!(buffer.select(0).is_none());
    }
}
