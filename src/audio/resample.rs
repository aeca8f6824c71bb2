//! Linear interpolation sample rate conversion

use std::collections::VecDeque;

/// Streaming stereo resampler. Input frames are pushed as they are decoded
/// and output frames pulled one at a time.
#[derive(Debug)]
pub struct Resampler {
    pending: VecDeque<[f64; 2]>,
    /// Position of the next output frame, in input frames from the front
    position: f64,
    step: f64,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            position: 0.0,
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
        }
    }

    pub fn push(&mut self, frames: impl IntoIterator<Item = [f64; 2]>) {
        self.pending.extend(frames);
    }

    /// Next output frame. Without `flush`, waits for the input frame after
    /// the interpolation point; with it, the last input frame is held.
    pub fn next_frame(&mut self, flush: bool) -> Option<[f64; 2]> {
        let index = self.position as usize;
        let frac = self.position - index as f64;

        let frame = match (self.pending.get(index), self.pending.get(index + 1)) {
            (Some(a), Some(b)) => [
                a[0] + (b[0] - a[0]) * frac,
                a[1] + (b[1] - a[1]) * frac,
            ],
            (Some(a), None) if flush => *a,
            _ => return None,
        };

        self.position += self.step;
        while self.position >= 1.0 && !self.pending.is_empty() {
            self.pending.pop_front();
            self.position -= 1.0;
        }
        Some(frame)
    }

    /// Input frames buffered and not yet consumed
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(resampler: &mut Resampler) -> Vec<[f64; 2]> {
        std::iter::from_fn(|| resampler.next_frame(true)).collect()
    }

    #[test]
    fn test_same_rate_passes_through() {
        let mut resampler = Resampler::new(44100, 44100);
        let input: Vec<[f64; 2]> = (0..8).map(|i| [i as f64, -(i as f64)]).collect();
        resampler.push(input.clone());

        assert_eq!(drain(&mut resampler), input);
        assert_eq!(resampler.buffered(), 0);
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut resampler = Resampler::new(22050, 44100);
        resampler.push([[0.0, 0.0], [1.0, -1.0], [2.0, -2.0]]);

        let left: Vec<f64> = drain(&mut resampler).iter().map(|f| f[0]).collect();
        assert_eq!(left, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.0]);
    }

    #[test]
    fn test_downsampling_skips() {
        let mut resampler = Resampler::new(48000, 24000);
        resampler.push((0..6).map(|i| [i as f64, 0.0]));

        let left: Vec<f64> = drain(&mut resampler).iter().map(|f| f[0]).collect();
        assert_eq!(left, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_waits_for_more_input_unless_flushing() {
        let mut resampler = Resampler::new(22050, 44100);
        resampler.push([[1.0, 1.0]]);
        assert_eq!(resampler.next_frame(false), None);

        resampler.push([[3.0, 3.0]]);
        assert_eq!(resampler.next_frame(false), Some([1.0, 1.0]));
        assert_eq!(resampler.next_frame(false), Some([2.0, 2.0]));
        assert_eq!(resampler.next_frame(false), None);
        assert_eq!(resampler.next_frame(true), Some([3.0, 3.0]));
    }
}
