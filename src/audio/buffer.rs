//! Render buffer shared with the audio output callback
//!
//! The playout scheduler pushes each chunk here at its release instant; the
//! output callback pulls fixed-size blocks whenever the device asks. This is
//! the only structure touched from two threads, so every access goes through
//! the mutex in [`SharedRenderBuffer`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::constants::{LATE_TOLERANCE, RENDER_BUFFER_SECONDS};
use crate::protocol::StreamData;

/// Stereo frame of silence
pub const SILENCE: [f64; 2] = [0.0, 0.0];

/// One stereo frame and the wall-clock instant it should be heard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedFrame {
    pub frame: [f64; 2],
    /// Nanoseconds since the Unix epoch
    pub at: i64,
}

/// Bounded queue of released frames. The oldest frames are evicted when full.
pub struct RenderBuffer {
    frames: VecDeque<TimedFrame>,
    capacity: usize,
    frame_nanos: f64,
    window: i64,
    late: i64,
    stats: RenderStats,
}

impl RenderBuffer {
    /// Create a buffer holding `capacity` frames at `sample_rate`
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        let frame_nanos = 1e9 / sample_rate.max(1) as f64;
        Self {
            frames: VecDeque::with_capacity(capacity.min(1 << 16)),
            capacity: capacity.max(1),
            frame_nanos,
            // A frame plays in the slot nearest to its time
            window: (frame_nanos / 2.0) as i64,
            late: LATE_TOLERANCE.as_nanos() as i64,
            stats: RenderStats::default(),
        }
    }

    /// Buffer sized for [`RENDER_BUFFER_SECONDS`] of audio, ready to share
    pub fn shared(sample_rate: u32) -> SharedRenderBuffer {
        Arc::new(Mutex::new(Self::new(
            RENDER_BUFFER_SECONDS * sample_rate as usize,
            sample_rate,
        )))
    }

    /// Queue every usable frame of a chunk, timed from its `next_at`.
    /// Frames stay sorted by play time whatever order chunks arrive in.
    pub fn push_chunk(&mut self, chunk: &StreamData) {
        for (index, frame) in chunk.frames().enumerate() {
            if self.frames.len() == self.capacity {
                self.frames.pop_front();
                self.stats.evicted += 1;
            }
            let timed = TimedFrame {
                frame,
                at: chunk.next_at + (index as f64 * self.frame_nanos) as i64,
            };
            match self.frames.back() {
                Some(last) if last.at > timed.at => {
                    let position = self.frames.partition_point(|f| f.at <= timed.at);
                    self.frames.insert(position, timed);
                }
                _ => self.frames.push_back(timed),
            }
        }
    }

    /// Fill `out` with the frames due during the block starting at `now`.
    ///
    /// Output slot `k` plays at `now + k` frame periods. Frames too old for
    /// their slot are discarded, slots with nothing due yet are silent.
    pub fn fill(&mut self, out: &mut [[f64; 2]], now: i64) {
        for (k, slot) in out.iter_mut().enumerate() {
            let slot_at = now + (k as f64 * self.frame_nanos) as i64;

            while let Some(front) = self.frames.front() {
                if front.at >= slot_at - self.late {
                    break;
                }
                self.frames.pop_front();
                self.stats.late_dropped += 1;
            }

            *slot = match self.frames.front() {
                Some(front) if front.at <= slot_at + self.window => {
                    let frame = front.frame;
                    self.frames.pop_front();
                    self.stats.rendered += 1;
                    frame
                }
                _ => {
                    self.stats.silence += 1;
                    SILENCE
                }
            };
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &TimedFrame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.clone()
    }
}

/// Thread-safe handle to a render buffer
pub type SharedRenderBuffer = Arc<Mutex<RenderBuffer>>;

/// Render statistics
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    pub rendered: u64,
    pub silence: u64,
    pub late_dropped: u64,
    pub evicted: u64,
}

/// Pull side of the render buffer, handed to the audio output
#[derive(Clone)]
pub struct Renderer {
    buffer: SharedRenderBuffer,
}

impl Renderer {
    pub fn new(buffer: SharedRenderBuffer) -> Self {
        Self { buffer }
    }

    /// Fill `out` for a block whose first frame is heard at `at`. Never
    /// waits on the network.
    pub fn fill_at(&self, out: &mut [[f64; 2]], at: i64) {
        self.buffer.lock().fill(out, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000; // 1 ms per frame keeps the arithmetic readable
    const MS: i64 = 1_000_000;

    fn chunk(values: &[f64], next_at: i64) -> StreamData {
        StreamData {
            samples_left: values.to_vec(),
            samples_right: values.iter().map(|v| -v).collect(),
            next_at,
        }
    }

    #[test]
    fn test_frames_are_timed_from_chunk_start() {
        let mut buffer = RenderBuffer::new(16, RATE);
        buffer.push_chunk(&chunk(&[0.1, 0.2, 0.3], 100 * MS));

        let times: Vec<i64> = buffer.frames().map(|f| f.at).collect();
        assert_eq!(times, vec![100 * MS, 101 * MS, 102 * MS]);
    }

    #[test]
    fn test_on_time_frames_rendered() {
        let mut buffer = RenderBuffer::new(16, RATE);
        buffer.push_chunk(&chunk(&[0.1, 0.2, 0.3], 100 * MS));

        let mut out = [[9.0; 2]; 3];
        buffer.fill(&mut out, 100 * MS);

        assert_eq!(out, [[0.1, -0.1], [0.2, -0.2], [0.3, -0.3]]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().rendered, 3);
    }

    #[test]
    fn test_early_frames_padded_with_silence() {
        let mut buffer = RenderBuffer::new(16, RATE);
        buffer.push_chunk(&chunk(&[0.5, 0.5], 103 * MS));

        let mut out = [[9.0; 2]; 6];
        buffer.fill(&mut out, 100 * MS);

        assert_eq!(&out[..3], &[SILENCE; 3]);
        assert_eq!(&out[3..5], &[[0.5, -0.5]; 2]);
        assert_eq!(out[5], SILENCE);
        assert_eq!(buffer.stats().silence, 4);
    }

    #[test]
    fn test_empty_buffer_is_silence() {
        let mut buffer = RenderBuffer::new(16, RATE);
        let mut out = [[9.0; 2]; 4];
        buffer.fill(&mut out, 0);
        assert_eq!(out, [SILENCE; 4]);
    }

    #[test]
    fn test_stale_frames_dropped() {
        let mut buffer = RenderBuffer::new(64, RATE);
        // 20 frames starting 30 ms ago: frames older than 10 ms are unplayable
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        buffer.push_chunk(&chunk(&values, 70 * MS));

        let mut out = [[9.0; 2]; 1];
        buffer.fill(&mut out, 100 * MS);

        // Frames at 70..=89 ms are all more than 10 ms late
        assert_eq!(out[0], SILENCE);
        assert_eq!(buffer.stats().late_dropped, 20);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = RenderBuffer::new(4, RATE);
        buffer.push_chunk(&chunk(&[1.0, 2.0, 3.0], 0));
        buffer.push_chunk(&chunk(&[4.0, 5.0, 6.0], 3 * MS));

        let kept: Vec<f64> = buffer.frames().map(|f| f.frame[0]).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buffer.stats().evicted, 2);
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn test_out_of_order_chunks_sorted() {
        let mut buffer = RenderBuffer::new(16, RATE);
        buffer.push_chunk(&chunk(&[3.0, 4.0], 3 * MS));
        buffer.push_chunk(&chunk(&[1.0, 2.0], MS));

        let kept: Vec<f64> = buffer.frames().map(|f| f.frame[0]).collect();
        assert_eq!(kept, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_renderer_shares_buffer() {
        let shared = RenderBuffer::shared(RATE);
        let renderer = Renderer::new(shared.clone());
        shared.lock().push_chunk(&chunk(&[0.25], 5 * MS));

        let mut out = [[0.0; 2]; 1];
        renderer.fill_at(&mut out, 5 * MS);
        assert_eq!(out[0], [0.25, -0.25]);
    }
}
