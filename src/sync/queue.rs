//! Chunks waiting for their play time, ordered by `next_at`

use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{ARRIVAL_WINDOW, LATE_TOLERANCE, MAX_PENDING_CHUNKS, RELEASE_HORIZON};
use crate::protocol::StreamData;

/// Result of asking the queue for the next chunk
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// Due within the release horizon
    Ready(StreamData),
    /// Missed its play time by more than the late tolerance
    Late(StreamData),
    /// Nothing due before this instant (nanoseconds since the epoch)
    Wait(i64),
    Empty,
}

/// Pending chunks keyed by play time. Equal play times keep arrival order.
///
/// A chunk is released [`RELEASE_HORIZON`] before its play time so the render
/// buffer holds it before the output callback asks for those frames.
#[derive(Debug)]
pub struct PlayoutQueue {
    pending: BTreeMap<(i64, u64), StreamData>,
    capacity: usize,
    lead: i64,
    late: i64,
    seq: u64,
}

impl PlayoutQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            capacity: capacity.max(1),
            lead: (RELEASE_HORIZON + ARRIVAL_WINDOW).as_nanos() as i64,
            late: LATE_TOLERANCE.as_nanos() as i64,
            seq: 0,
        }
    }

    /// Add a chunk. When full, the earliest chunk is evicted and returned.
    pub fn insert(&mut self, chunk: StreamData) -> Option<StreamData> {
        self.pending.insert((chunk.next_at, self.seq), chunk);
        self.seq = self.seq.wrapping_add(1);

        if self.pending.len() > self.capacity {
            self.pending.pop_first().map(|(_, evicted)| evicted)
        } else {
            None
        }
    }

    /// Release horizon for queues feeding a renderer with a different lead
    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.lead = (horizon + ARRIVAL_WINDOW).as_nanos() as i64;
        self
    }

    /// Take the earliest chunk if it is due or hopelessly late
    pub fn poll(&mut self, now: i64) -> Poll {
        let Some((&(at, _), _)) = self.pending.first_key_value() else {
            return Poll::Empty;
        };

        let delta = at - now;
        if delta > self.lead {
            return Poll::Wait(at - self.lead);
        }

        let Some((_, chunk)) = self.pending.pop_first() else {
            return Poll::Empty;
        };
        if delta < -self.late {
            Poll::Late(chunk)
        } else {
            Poll::Ready(chunk)
        }
    }

    /// Play time of the earliest pending chunk
    pub fn next_due(&self) -> Option<i64> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for PlayoutQueue {
    fn default() -> Self {
        Self::new(MAX_PENDING_CHUNKS)
    }
}
