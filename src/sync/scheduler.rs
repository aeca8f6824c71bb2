//! Playout scheduler
//!
//! Collects `StreamData` from the bus and hands each chunk to the render
//! buffer one release horizon before its play time. The render buffer then
//! places every frame in the output slot matching its instant, so timing
//! does not depend on when this thread wakes up or on the callback phase.
//! Chunks arrive out of order and early; the scheduler reorders them and
//! discards those that missed their slot.

use crossbeam_channel::{select, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::buffer::SharedRenderBuffer;
use crate::bus::BusHandle;
use crate::constants::{IDLE_POLL, MAILBOX_CAPACITY, MAX_PENDING_CHUNKS};
use crate::error::Error;
use crate::protocol::{Message, Opcode};
use crate::shutdown::ShutdownSignal;
use crate::sync::queue::{PlayoutQueue, Poll};
use crate::sync::wall_clock_nanos;

/// Playout counters, returned when the scheduler thread exits
#[derive(Debug, Clone, Default)]
pub struct PlayoutStats {
    pub received: u64,
    pub released: u64,
    pub late: u64,
    pub evicted: u64,
}

/// Releases chunks into a render buffer ahead of their play time
pub struct PlayoutScheduler {
    mailbox: Receiver<Message>,
    render: SharedRenderBuffer,
    queue: PlayoutQueue,
    stats: PlayoutStats,
}

impl PlayoutScheduler {
    pub fn new(bus: &BusHandle, render: SharedRenderBuffer) -> Result<Self, Error> {
        let mailbox = bus.subscribe("playout", &[Opcode::StreamData], MAILBOX_CAPACITY)?;
        Ok(Self {
            mailbox,
            render,
            queue: PlayoutQueue::new(MAX_PENDING_CHUNKS),
            stats: PlayoutStats::default(),
        })
    }

    /// Start the scheduler thread
    pub fn spawn(mut self, shutdown: ShutdownSignal) -> Result<JoinHandle<PlayoutStats>, Error> {
        let handle = thread::Builder::new()
            .name("playout".into())
            .spawn(move || {
                self.run(&shutdown);
                self.stats
            })?;
        Ok(handle)
    }

    fn run(&mut self, shutdown: &ShutdownSignal) {
        info!("Playout scheduler started");
        let mailbox = self.mailbox.clone();

        loop {
            let timeout = self.release_due(wall_clock_nanos());

            select! {
                recv(mailbox) -> message => match message {
                    Ok(message) => self.accept(message),
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
                default(timeout) => {}
            }
        }

        info!(
            "Playout scheduler stopped: {} received, {} released, {} late, {} evicted",
            self.stats.received, self.stats.released, self.stats.late, self.stats.evicted
        );
    }

    fn accept(&mut self, message: Message) {
        let Message::StreamData(chunk) = message else {
            debug!("Playout ignoring {:?}", message.opcode());
            return;
        };

        self.stats.received += 1;
        if let Some(evicted) = self.queue.insert(chunk) {
            warn!("Playout queue full, evicting chunk due at {}", evicted.next_at);
            self.stats.evicted += 1;
        }
    }

    /// Release everything due at `now`. Returns how long to sleep before the
    /// next chunk is due.
    fn release_due(&mut self, now: i64) -> Duration {
        loop {
            match self.queue.poll(now) {
                Poll::Ready(chunk) => {
                    self.render.lock().push_chunk(&chunk);
                    self.stats.released += 1;
                }
                Poll::Late(chunk) => {
                    debug!("Discarding chunk {} ns late", now - chunk.next_at);
                    self.stats.late += 1;
                }
                Poll::Wait(until) => {
                    return Duration::from_nanos((until - now).max(0) as u64);
                }
                Poll::Empty => return IDLE_POLL,
            }
        }
    }
}
