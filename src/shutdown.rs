//! Process-wide stop signal
//!
//! The trigger owns the only sender of a channel that never carries a value.
//! Firing (or dropping) it disconnects the channel, which every clone of the
//! signal observes at once, including inside `crossbeam_channel::select!`.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Create a linked trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = bounded(0);
    (ShutdownTrigger { tx: Some(tx) }, ShutdownSignal { rx })
}

/// Fires the shutdown. Dropping it fires as well.
pub struct ShutdownTrigger {
    tx: Option<Sender<()>>,
}

impl ShutdownTrigger {
    pub fn fire(&mut self) {
        self.tx.take();
    }
}

/// Observer side, cheap to clone into every worker
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// For use in `select!`: becomes ready once shutdown fires
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Sleep for `timeout` unless shutdown fires first. Returns true on shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Sleep until `deadline` unless shutdown fires first. Returns true on shutdown.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait_timeout(deadline.saturating_duration_since(Instant::now()))
    }
}
