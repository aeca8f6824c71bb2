//! In-process message bus
//!
//! One dispatch thread owns the routing table. Publishers and registrations
//! reach it through a single bounded FIFO, so a publisher's messages arrive at
//! every subscriber in publish order and a registration made before a publish
//! from the same handle is always in effect for it.
//!
//! Each subscriber has its own bounded mailbox. Delivery never waits: a copy
//! that does not fit in a full mailbox is dropped and counted right away, so
//! a stalled subscriber cannot slow down the others.

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::protocol::{Message, Opcode};
use crate::shutdown::ShutdownSignal;

/// Inbound queue of one subscriber
#[derive(Clone)]
pub struct Mailbox {
    name: String,
    tx: Sender<Message>,
}

impl Mailbox {
    /// Create a mailbox and the receiving end its owner consumes
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, Receiver<Message>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, message: Message) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Disconnected(_)) => Delivery::Gone,
        }
    }
}

enum Delivery {
    Delivered,
    Dropped,
    Gone,
}

enum Command {
    Register(Opcode, Mailbox),
    Publish(Message),
}

/// Cloneable entry point to a running bus
#[derive(Clone)]
pub struct BusHandle {
    tx: Sender<Command>,
}

impl BusHandle {
    /// Queue a message for dispatch. Blocks while the bus queue is full.
    pub fn publish(&self, message: impl Into<Message>) -> Result<(), BusError> {
        self.tx
            .send(Command::Publish(message.into()))
            .map_err(|_| BusError::Closed)
    }

    /// Route every message with `opcode` to `mailbox`
    pub fn register(&self, opcode: Opcode, mailbox: Mailbox) -> Result<(), BusError> {
        self.tx
            .send(Command::Register(opcode, mailbox))
            .map_err(|_| BusError::Closed)
    }

    /// Create one mailbox and register it for a batch of opcodes
    pub fn subscribe(
        &self,
        name: &str,
        opcodes: &[Opcode],
        capacity: usize,
    ) -> Result<Receiver<Message>, BusError> {
        let (mailbox, rx) = Mailbox::new(name, capacity);
        for opcode in opcodes {
            self.register(*opcode, mailbox.clone())?;
        }
        Ok(rx)
    }
}

/// Bus counters, returned when the dispatch thread exits
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub unrouted: u64,
    pub dropped: u64,
}

/// Message bus before its dispatch thread is started
pub struct MessageBus {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    pub fn handle(&self) -> BusHandle {
        BusHandle {
            tx: self.tx.clone(),
        }
    }

    /// Start the dispatch thread
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<JoinHandle<BusStats>, BusError> {
        // The bus must not keep itself alive through its own sender
        let MessageBus { tx, rx } = self;
        drop(tx);

        thread::Builder::new()
            .name("message-bus".into())
            .spawn(move || {
                let mut dispatcher = Dispatcher::default();
                dispatcher.run(&rx, &shutdown);
                dispatcher.stats
            })
            .map_err(|e| BusError::Spawn(e.to_string()))
    }
}

#[derive(Default)]
struct Dispatcher {
    routes: HashMap<Opcode, Vec<Mailbox>>,
    stats: BusStats,
}

impl Dispatcher {
    fn run(&mut self, rx: &Receiver<Command>, shutdown: &ShutdownSignal) {
        info!("Message bus started");

        loop {
            select! {
                recv(rx) -> command => match command {
                    Ok(command) => self.handle(command),
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
            }
        }

        let discarded = rx.try_iter().count();
        if discarded > 0 {
            debug!("Discarded {} queued bus commands on shutdown", discarded);
        }
        info!(
            "Message bus stopped: {} published, {} delivered, {} unrouted, {} dropped",
            self.stats.published, self.stats.delivered, self.stats.unrouted, self.stats.dropped
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(opcode, mailbox) => {
                debug!("{} registered for {:?}", mailbox.name(), opcode);
                self.routes.entry(opcode).or_default().push(mailbox);
            }
            Command::Publish(message) => self.dispatch(message),
        }
    }

    fn dispatch(&mut self, message: Message) {
        self.stats.published += 1;
        let opcode = message.opcode();

        let Some(mailboxes) = self.routes.get_mut(&opcode) else {
            debug!("No receivers registered for {:?}, dropping", opcode);
            self.stats.unrouted += 1;
            return;
        };

        let stats = &mut self.stats;
        mailboxes.retain(|mailbox| match mailbox.deliver(message.clone()) {
            Delivery::Delivered => {
                stats.delivered += 1;
                true
            }
            Delivery::Dropped => {
                warn!("Mailbox {} is full, dropping {:?}", mailbox.name(), opcode);
                stats.dropped += 1;
                true
            }
            Delivery::Gone => {
                debug!("Mailbox {} closed, unregistering", mailbox.name());
                false
            }
        });

        if mailboxes.is_empty() {
            self.routes.remove(&opcode);
        }
    }
}
