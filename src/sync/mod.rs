//! Synchronized playback
//!
//! Every device shares one notion of time: the wall clock. A producer stamps
//! each chunk with the instant its first frame must be heard, a fixed
//! [`LOOKAHEAD`](crate::constants::LOOKAHEAD) in the future. Receivers hold
//! chunks until that instant and release them to the render buffer.

pub mod producer;
pub mod queue;
pub mod scheduler;

pub use producer::{StreamStats, Streamer};
pub use queue::{PlayoutQueue, Poll};
pub use scheduler::{PlayoutScheduler, PlayoutStats};

use chrono::Utc;

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn wall_clock_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Playing time of `frames` at `sample_rate`, in nanoseconds
pub fn frames_to_nanos(frames: usize, sample_rate: u32) -> i64 {
    (frames as i128 * 1_000_000_000 / sample_rate.max(1) as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_duration() {
        // 512 frames at 44.1 kHz is just over 11.6 ms
        assert_eq!(frames_to_nanos(512, 44100), 11_609_977);
        assert_eq!(frames_to_nanos(1000, 1000), 1_000_000_000);
    }

    #[test]
    fn test_wall_clock_is_recent() {
        // Later than 2020-01-01
        assert!(wall_clock_nanos() > 1_577_836_800_000_000_000);
    }
}
