//! Peer transport
//!
//! Two threads share one UDP socket:
//!
//! - the **listener** blocks on `recv_from`, classifies each datagram and
//!   either relays it to the bus or forwards announce sightings to the loop;
//! - the **transport loop** owns the [`PeerTable`] and reacts to the ticker
//!   (self-announce + liveness sweep), to sightings, and to write requests.
//!
//! Only the transport loop touches the peer table.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::bus::BusHandle;
use crate::codec;
use crate::constants::{MAILBOX_CAPACITY, MAX_DATAGRAM_SIZE, PEER_TIMEOUT_TICKS, TICK_INTERVAL};
use crate::context::Context;
use crate::error::{Error, NetworkError, PolicyViolation, ProtocolError};
use crate::network::peers::PeerTable;
use crate::network::udp::{broadcast_addr, create_socket, READ_TIMEOUT};
use crate::protocol::{Announce, Message, Opcode, PeerOffline, PeerOnline, WriteRequest, SERVICE_NUMBER};
use crate::shutdown::ShutdownSignal;

/// What an accepted datagram turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A valid announce from another device
    Sighting { id: String, address: SocketAddr },
    /// An application message for the bus
    Relay(Message),
    /// Zero-length datagram
    Empty,
}

/// Why a datagram was not accepted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),
}

/// Decide what to do with one datagram received from `source`
pub fn classify(frame: &[u8], source: SocketAddr, own_name: &str) -> Result<Inbound, Rejection> {
    let message = match codec::decode(frame)? {
        Some(message) => message,
        None => return Ok(Inbound::Empty),
    };

    match message {
        Message::Announce(announce) => {
            if announce.device_name == own_name {
                return Err(PolicyViolation::SelfEcho.into());
            }
            if announce.service_number != SERVICE_NUMBER {
                return Err(PolicyViolation::ServiceMismatch {
                    expected: SERVICE_NUMBER,
                    got: announce.service_number,
                }
                .into());
            }

            let address = announce
                .return_address
                .as_deref()
                .and_then(|addr| match addr.parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => {
                        debug!("Ignoring unparseable return address {:?} from {}", addr, source);
                        None
                    }
                })
                .unwrap_or(source);

            Ok(Inbound::Sighting {
                id: announce.device_name,
                address,
            })
        }
        message if message.opcode().is_internal() => {
            Err(PolicyViolation::InternalOpcode(message.opcode()).into())
        }
        message => Ok(Inbound::Relay(message)),
    }
}

/// Transport counters
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub datagrams_received: u64,
    pub invalid_datagrams: u64,
    pub policy_drops: u64,
    pub relayed: u64,
    pub peers_discovered: u64,
    pub peers_evicted: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

#[derive(Default)]
struct Counters {
    datagrams_received: AtomicU64,
    invalid_datagrams: AtomicU64,
    policy_drops: AtomicU64,
    relayed: AtomicU64,
    peers_discovered: AtomicU64,
    peers_evicted: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            invalid_datagrams: self.invalid_datagrams.load(Ordering::Relaxed),
            policy_drops: self.policy_drops.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            peers_discovered: self.peers_discovered.load(Ordering::Relaxed),
            peers_evicted: self.peers_evicted.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Announce seen by the listener, handed to the transport loop
struct Sighting {
    id: String,
    address: SocketAddr,
    at: Instant,
}

/// Bound transport, not yet running
pub struct PeerTransport {
    ctx: Arc<Context>,
    socket: UdpSocket,
    bus: BusHandle,
    mailbox: Receiver<Message>,
    tick: Duration,
}

impl PeerTransport {
    /// Bind the discovery port and subscribe to write requests
    pub fn bind(ctx: Arc<Context>, bus: BusHandle) -> Result<Self, Error> {
        let socket = create_socket(ctx.config.discovery.port)?;
        let mailbox = bus.subscribe("transport", &[Opcode::WriteRequest], MAILBOX_CAPACITY)?;

        Ok(Self {
            ctx,
            socket,
            bus,
            mailbox,
            tick: TICK_INTERVAL,
        })
    }

    /// Announce and sweep period. Peers are evicted after
    /// [`PEER_TIMEOUT_TICKS`] silent ticks.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Start the listener and the transport loop
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<TransportHandle, NetworkError> {
        let port = self.local_addr()?.port();
        let listen_socket = self
            .socket
            .try_clone()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let announce_frame = codec::encode(&Message::Announce(Announce::new(self.ctx.device_name())))
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let counters = Arc::new(Counters::default());
        let (sighting_tx, sighting_rx) = bounded(MAILBOX_CAPACITY);

        let listener = Listener {
            socket: listen_socket,
            own_name: self.ctx.device_name().to_string(),
            bus: self.bus.clone(),
            sightings: sighting_tx,
            counters: counters.clone(),
        };
        let listener_shutdown = shutdown.clone();
        let listener_thread = thread::Builder::new()
            .name("transport-listener".into())
            .spawn(move || listener.run(&listener_shutdown))
            .map_err(|e| NetworkError::Spawn("transport-listener", e.to_string()))?;

        let mut worker = TransportLoop {
            socket: self.socket,
            bus: self.bus,
            table: PeerTable::new(self.tick * PEER_TIMEOUT_TICKS),
            tick: self.tick,
            announce_frame,
            broadcast: broadcast_addr(port),
            counters: counters.clone(),
        };
        let mailbox = self.mailbox;
        let worker_thread = thread::Builder::new()
            .name("transport-loop".into())
            .spawn(move || worker.run(&sighting_rx, &mailbox, &shutdown))
            .map_err(|e| NetworkError::Spawn("transport-loop", e.to_string()))?;

        info!("Peer transport listening on port {}", port);

        Ok(TransportHandle {
            listener: listener_thread,
            worker: worker_thread,
            counters,
        })
    }
}

/// Running transport
pub struct TransportHandle {
    listener: JoinHandle<()>,
    worker: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl TransportHandle {
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Wait for both threads to exit after shutdown has fired
    pub fn join(self) -> TransportStats {
        if self.listener.join().is_err() {
            warn!("Transport listener panicked");
        }
        if self.worker.join().is_err() {
            warn!("Transport loop panicked");
        }
        self.counters.snapshot()
    }
}

struct Listener {
    socket: UdpSocket,
    own_name: String,
    bus: BusHandle,
    sightings: Sender<Sighting>,
    counters: Arc<Counters>,
}

impl Listener {
    fn run(self, shutdown: &ShutdownSignal) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !shutdown.is_triggered() {
            let (len, source) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    warn!("{}", NetworkError::ReceiveFailed(e.to_string()));
                    if shutdown.wait_timeout(READ_TIMEOUT) {
                        break;
                    }
                    continue;
                }
            };
            Counters::bump(&self.counters.datagrams_received);

            match classify(&buf[..len], source, &self.own_name) {
                Ok(Inbound::Sighting { id, address }) => {
                    let sighting = Sighting {
                        id,
                        address,
                        at: Instant::now(),
                    };
                    if self.sightings.send(sighting).is_err() {
                        break;
                    }
                }
                Ok(Inbound::Relay(message)) => {
                    Counters::bump(&self.counters.relayed);
                    if self.bus.publish(message).is_err() {
                        break;
                    }
                }
                Ok(Inbound::Empty) => {}
                Err(Rejection::Policy(violation)) => {
                    trace!("Ignoring datagram from {}: {}", source, violation);
                    Counters::bump(&self.counters.policy_drops);
                }
                Err(Rejection::Protocol(e)) => {
                    warn!("Dropping datagram from {}: {}", source, e);
                    Counters::bump(&self.counters.invalid_datagrams);
                }
            }
        }

        debug!("Transport listener stopped");
    }
}

struct TransportLoop {
    socket: UdpSocket,
    bus: BusHandle,
    table: PeerTable,
    announce_frame: Bytes,
    broadcast: SocketAddr,
    tick: Duration,
    counters: Arc<Counters>,
}

impl TransportLoop {
    fn run(
        &mut self,
        sightings: &Receiver<Sighting>,
        mailbox: &Receiver<Message>,
        shutdown: &ShutdownSignal,
    ) {
        let ticker = tick(self.tick);
        self.announce();

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.announce();
                    self.sweep(Instant::now());
                },
                recv(sightings) -> sighting => match sighting {
                    Ok(sighting) => self.on_sighting(sighting),
                    Err(_) => break,
                },
                recv(mailbox) -> message => match message {
                    Ok(Message::WriteRequest(request)) => self.write(&request),
                    Ok(other) => debug!("Transport ignoring {:?}", other.opcode()),
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
            }
        }

        info!("Peer transport stopped with {} known peers", self.table.len());
    }

    fn on_sighting(&mut self, sighting: Sighting) {
        if !self.table.observe(&sighting.id, sighting.address, sighting.at) {
            return;
        }

        info!("New device discovered: {} at {}", sighting.id, sighting.address);
        Counters::bump(&self.counters.peers_discovered);
        self.publish(PeerOnline {
            device_id: sighting.id,
        });
    }

    fn sweep(&mut self, now: Instant) {
        for id in self.table.sweep(now) {
            warn!("Device {} not announced for a while, removing it from known peers", id);
            Counters::bump(&self.counters.peers_evicted);
            self.publish(PeerOffline { device_id: id });
        }
    }

    fn announce(&self) {
        if let Err(e) = self.socket.send_to(&self.announce_frame, self.broadcast) {
            warn!("Failed to broadcast announce to {}: {}", self.broadcast, e);
        }
    }

    fn write(&self, request: &WriteRequest) {
        if request.payload.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Not sending to {}: {}",
                request.target,
                NetworkError::PacketTooLarge(request.payload.len())
            );
            return;
        }

        let addresses = self.table.resolve(&request.target, request.is_broadcast());
        if addresses.is_empty() {
            debug!("No known peer for target {}", request.target);
        }

        for address in addresses {
            match self.socket.send_to(&request.payload, address) {
                Ok(sent) => {
                    Counters::bump(&self.counters.packets_sent);
                    self.counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    let opcode = request.payload.first().copied().unwrap_or_default();
                    warn!("Failed to send message 0x{:02x} to {}: {}", opcode, address, e);
                    Counters::bump(&self.counters.send_failures);
                }
            }
        }
    }

    fn publish(&self, message: impl Into<Message>) {
        if let Err(e) = self.bus.publish(message) {
            debug!("Transport could not publish: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::config::AppConfig;
    use crate::identity::DeviceId;
    use crate::protocol::DeviceStatus;
    use crate::shutdown;
    use std::time::Duration;

    const OWN: &str = "own-device";

    fn source() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], 19416))
    }

    fn frame(message: Message) -> Bytes {
        codec::encode(&message).unwrap()
    }

    #[test]
    fn test_classify_sighting() {
        let inbound = classify(&frame(Announce::new("A").into()), source(), OWN).unwrap();
        assert_eq!(
            inbound,
            Inbound::Sighting {
                id: "A".into(),
                address: source()
            }
        );
    }

    #[test]
    fn test_classify_return_address() {
        let announce = Announce {
            return_address: Some("10.0.0.9:20000".into()),
            ..Announce::new("A")
        };
        let inbound = classify(&frame(announce.into()), source(), OWN).unwrap();
        assert_eq!(
            inbound,
            Inbound::Sighting {
                id: "A".into(),
                address: "10.0.0.9:20000".parse().unwrap()
            }
        );

        let announce = Announce {
            return_address: Some("garbage".into()),
            ..Announce::new("A")
        };
        let inbound = classify(&frame(announce.into()), source(), OWN).unwrap();
        assert_eq!(
            inbound,
            Inbound::Sighting {
                id: "A".into(),
                address: source()
            }
        );
    }

    #[test]
    fn test_classify_self_echo() {
        let result = classify(&frame(Announce::new(OWN).into()), source(), OWN);
        assert_eq!(result, Err(Rejection::Policy(PolicyViolation::SelfEcho)));
    }

    #[test]
    fn test_classify_wrong_service() {
        let announce = Announce {
            service_number: 0xDEAD_BEEF,
            ..Announce::new("A")
        };
        let result = classify(&frame(announce.into()), source(), OWN);
        assert!(matches!(
            result,
            Err(Rejection::Policy(PolicyViolation::ServiceMismatch { got: 0xDEAD_BEEF, .. }))
        ));
    }

    #[test]
    fn test_classify_internal_refused() {
        let message = PeerOnline {
            device_id: "spoofed".into(),
        };
        let result = classify(&frame(message.into()), source(), OWN);
        assert_eq!(
            result,
            Err(Rejection::Policy(PolicyViolation::InternalOpcode(Opcode::PeerOnline)))
        );
    }

    #[test]
    fn test_classify_relay_and_garbage() {
        let status = Message::DeviceStatus(DeviceStatus {
            device_id: "A".into(),
            allowed: true,
        });
        assert_eq!(
            classify(&frame(status.clone()), source(), OWN).unwrap(),
            Inbound::Relay(status)
        );
        assert_eq!(classify(&[], source(), OWN).unwrap(), Inbound::Empty);
        assert_eq!(
            classify(&[0x42, 1, 2, 3], source(), OWN),
            Err(Rejection::Protocol(ProtocolError::UnknownOpcode(0x42)))
        );
    }

    struct Node {
        trigger: shutdown::ShutdownTrigger,
        bus_thread: JoinHandle<crate::bus::BusStats>,
        transport: TransportHandle,
        bus: BusHandle,
        port: u16,
    }

    fn start_node(subscribe: &[Opcode]) -> (Node, Receiver<Message>) {
        start_node_ticking(subscribe, TICK_INTERVAL)
    }

    fn start_node_ticking(subscribe: &[Opcode], tick: Duration) -> (Node, Receiver<Message>) {
        let mut config = AppConfig::default();
        config.discovery.port = 0;
        let ctx = Context::new(DeviceId::random(), config);

        let (trigger, signal) = shutdown::channel();
        let bus = MessageBus::new(64);
        let handle = bus.handle();
        let bus_thread = bus.spawn(signal.clone()).unwrap();
        let observed = handle.subscribe("test", subscribe, 64).unwrap();

        let transport = PeerTransport::bind(ctx, handle.clone())
            .unwrap()
            .with_tick_interval(tick);
        let port = transport.local_addr().unwrap().port();
        let transport = transport.spawn(signal).unwrap();

        (
            Node {
                trigger,
                bus_thread,
                transport,
                bus: handle,
                port,
            },
            observed,
        )
    }

    fn stop(mut node: Node) -> TransportStats {
        node.trigger.fire();
        let stats = node.transport.join();
        node.bus_thread.join().unwrap();
        stats
    }

    #[test]
    fn test_announce_publishes_peer_online_once() {
        let (node, observed) = start_node(&[Opcode::PeerOnline]);
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], node.port));

        let announce = frame(Announce::new("A").into());
        remote.send_to(&announce, target).unwrap();
        remote.send_to(&announce, target).unwrap();

        let message = observed.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            message,
            Message::PeerOnline(PeerOnline {
                device_id: "A".into()
            })
        );
        assert!(observed.recv_timeout(Duration::from_millis(300)).is_err());

        let stats = stop(node);
        assert_eq!(stats.peers_discovered, 1);
    }

    #[test]
    fn test_silent_peer_goes_offline_once_then_returns() {
        let (node, observed) =
            start_node_ticking(&[Opcode::PeerOnline, Opcode::PeerOffline], Duration::from_millis(50));
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], node.port));
        let announce = frame(Announce::new("A").into());
        let online = Message::PeerOnline(PeerOnline {
            device_id: "A".into(),
        });

        remote.send_to(&announce, target).unwrap();
        assert_eq!(observed.recv_timeout(Duration::from_secs(2)).unwrap(), online);

        // Silent for more than three ticks
        assert_eq!(
            observed.recv_timeout(Duration::from_secs(2)).unwrap(),
            Message::PeerOffline(PeerOffline {
                device_id: "A".into()
            })
        );
        assert!(observed.recv_timeout(Duration::from_millis(400)).is_err());

        // Coming back is a fresh discovery
        remote.send_to(&announce, target).unwrap();
        assert_eq!(observed.recv_timeout(Duration::from_secs(2)).unwrap(), online);

        let stats = stop(node);
        assert_eq!(stats.peers_discovered, 2);
        assert_eq!(stats.peers_evicted, 1);
    }

    #[test]
    fn test_write_request_reaches_known_peer() {
        let (node, observed) = start_node(&[Opcode::PeerOnline]);
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        remote
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], node.port));

        remote.send_to(&frame(Announce::new("A").into()), target).unwrap();
        observed.recv_timeout(Duration::from_secs(2)).unwrap();

        let payload = frame(
            DeviceStatus {
                device_id: "A".into(),
                allowed: true,
            }
            .into(),
        );
        node.bus
            .publish(WriteRequest::to("A", payload.clone()))
            .unwrap();
        // Unknown target resolves to nobody
        node.bus
            .publish(WriteRequest::to("B", Bytes::from_static(b"x")))
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = remote.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &payload[..]);

        let stats = stop(node);
        assert_eq!(stats.packets_sent, 1);
    }

    #[test]
    fn test_application_messages_are_relayed() {
        let (node, observed) = start_node(&[Opcode::DeviceStatus]);
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], node.port));

        let status = Message::DeviceStatus(DeviceStatus {
            device_id: "A".into(),
            allowed: false,
        });
        remote.send_to(&[0x99, 0x00], target).unwrap();
        remote.send_to(&frame(status.clone()), target).unwrap();

        assert_eq!(observed.recv_timeout(Duration::from_secs(2)).unwrap(), status);

        let stats = stop(node);
        assert_eq!(stats.relayed, 1);
        assert_eq!(stats.invalid_datagrams, 1);
    }
}
