//! Streamer: reads a source in real time and stamps each block with its play time

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audio::buffer::SILENCE;
use crate::audio::source::{Playlist, SampleSource, SourceOpener};
use crate::bus::BusHandle;
use crate::codec;
use crate::constants::{BLOCK_FRAMES, LOOKAHEAD};
use crate::context::Context;
use crate::error::{AudioError, Error};
use crate::protocol::{Message, StreamData, WriteRequest};
use crate::shutdown::ShutdownSignal;
use crate::sync::{frames_to_nanos, wall_clock_nanos};

/// Streaming counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: u64,
    pub frames: u64,
    /// Times the producer fell too far behind and restarted its timeline
    pub reanchors: u64,
}

impl StreamStats {
    fn merge(&mut self, other: &StreamStats) {
        self.chunks += other.chunks;
        self.frames += other.frames;
        self.reanchors += other.reanchors;
    }
}

/// Publishes audio to this device and to every peer
pub struct Streamer {
    bus: BusHandle,
    sample_rate: u32,
    lookahead: Duration,
}

impl Streamer {
    pub fn new(ctx: &Context, bus: BusHandle) -> Self {
        Self {
            bus,
            sample_rate: ctx.sample_rate(),
            lookahead: LOOKAHEAD,
        }
    }

    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Stream `source` until it runs out or shutdown fires.
    ///
    /// Block `k` is published at `anchor + offset(k)` and plays at
    /// `anchor + lookahead + offset(k)`, where the offset counts whole frames,
    /// so the pacing never drifts from the sample clock.
    pub fn stream(
        &self,
        source: &mut dyn SampleSource,
        shutdown: &ShutdownSignal,
    ) -> Result<StreamStats, Error> {
        let format = source.format();
        if format.sample_rate != self.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "source is {} Hz, mesh plays at {} Hz",
                format.sample_rate, self.sample_rate
            ))
            .into());
        }

        let lookahead = self.lookahead.as_nanos() as i64;
        let mut stats = StreamStats::default();
        let mut block = vec![SILENCE; BLOCK_FRAMES];

        let mut anchor = Instant::now();
        let mut anchor_wall = wall_clock_nanos();
        let mut anchored_frames: usize = 0;

        while !shutdown.is_triggered() {
            let read = source.read(&mut block)?;
            if read == 0 {
                break;
            }

            let mut offset = frames_to_nanos(anchored_frames, self.sample_rate);
            let due = anchor + Duration::from_nanos(offset as u64);
            if Instant::now().saturating_duration_since(due) > self.lookahead {
                warn!("Streamer fell {:?} behind, re-anchoring", due.elapsed());
                anchor = Instant::now();
                anchor_wall = wall_clock_nanos();
                anchored_frames = 0;
                offset = 0;
                stats.reanchors += 1;
            }

            let chunk = StreamData::from_frames(&block[..read], anchor_wall + lookahead + offset);
            self.emit(chunk)?;

            stats.chunks += 1;
            stats.frames += read as u64;
            anchored_frames += read;

            let next = frames_to_nanos(anchored_frames, self.sample_rate);
            if shutdown.wait_until(anchor + Duration::from_nanos(next as u64)) {
                break;
            }
        }

        debug!("Stream ended after {} chunks", stats.chunks);
        Ok(stats)
    }

    /// Stream every playlist entry in order. Entries that cannot be opened or
    /// read are skipped.
    pub fn play_playlist(
        &self,
        playlist: &Playlist,
        opener: &dyn SourceOpener,
        shutdown: &ShutdownSignal,
    ) -> Result<StreamStats, Error> {
        let mut total = StreamStats::default();

        for path in playlist.entries() {
            if shutdown.is_triggered() {
                break;
            }
            match self.play_entry(path, opener, shutdown) {
                Ok(stats) => total.merge(&stats),
                Err(Error::Audio(e)) => warn!("Skipping {}: {}", path.display(), e),
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    fn play_entry(
        &self,
        path: &Path,
        opener: &dyn SourceOpener,
        shutdown: &ShutdownSignal,
    ) -> Result<StreamStats, Error> {
        let mut source = opener.open(path)?;
        info!("Now streaming {}", path.display());
        self.stream(source.as_mut(), shutdown)
    }

    fn emit(&self, chunk: StreamData) -> Result<(), Error> {
        let message = Message::StreamData(chunk);
        let frame = codec::encode(&message)?;

        self.bus.publish(WriteRequest::broadcast(frame))?;
        self.bus.publish(message)?;
        Ok(())
    }
}
