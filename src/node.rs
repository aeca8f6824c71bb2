//! A running mesh device: bus, transport, mesh trust and playout wired together

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::audio::buffer::{RenderBuffer, Renderer, SharedRenderBuffer};
use crate::bus::{BusHandle, BusStats, MessageBus};
use crate::constants::BUS_CAPACITY;
use crate::context::Context;
use crate::error::Error;
use crate::mesh::{MeshService, TrustTable};
use crate::network::{PeerTransport, TransportHandle, TransportStats};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::sync::{PlayoutScheduler, PlayoutStats};

/// Final state of every worker
#[derive(Debug)]
pub struct NodeReport {
    pub bus: BusStats,
    pub transport: TransportStats,
    pub playout: PlayoutStats,
    /// `None` if the mesh thread panicked
    pub trust: Option<TrustTable>,
}

/// Handle to the worker threads of one device
pub struct Node {
    trigger: ShutdownTrigger,
    signal: ShutdownSignal,
    bus: BusHandle,
    render: SharedRenderBuffer,
    local_addr: SocketAddr,
    bus_thread: JoinHandle<BusStats>,
    transport: TransportHandle,
    mesh: JoinHandle<TrustTable>,
    playout: JoinHandle<PlayoutStats>,
}

impl Node {
    /// Start every worker. If any of them fails to start, the ones already
    /// running are shut down.
    pub fn start(ctx: Arc<Context>) -> Result<Self, Error> {
        let (trigger, signal) = shutdown::channel();

        let bus = MessageBus::new(BUS_CAPACITY);
        let handle = bus.handle();
        let bus_thread = bus.spawn(signal.clone())?;

        // Subscribers register before the transport can publish anything,
        // otherwise an early PeerOnline would find no route
        let mesh = MeshService::new(&ctx, handle.clone())?;
        let render = RenderBuffer::shared(ctx.sample_rate());
        let playout = PlayoutScheduler::new(&handle, render.clone())?;
        let transport = PeerTransport::bind(ctx.clone(), handle.clone())?;
        let local_addr = transport.local_addr()?;

        let mesh = mesh.spawn(signal.clone())?;
        let playout = playout.spawn(signal.clone())?;
        let transport = transport.spawn(signal.clone())?;

        info!("Node {} listening on {}", ctx.device_name(), local_addr);

        Ok(Self {
            trigger,
            signal,
            bus: handle,
            render,
            local_addr,
            bus_thread,
            transport,
            mesh,
            playout,
        })
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Pull side of the render buffer, for the audio output
    pub fn renderer(&self) -> Renderer {
        Renderer::new(self.render.clone())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tell every worker to stop without waiting for them
    pub fn begin_shutdown(&mut self) {
        self.trigger.fire();
    }

    /// Stop every worker and collect their final state
    pub fn shutdown(mut self) -> NodeReport {
        self.trigger.fire();

        let playout = self.playout.join().unwrap_or_else(|_| {
            warn!("Playout thread panicked");
            PlayoutStats::default()
        });
        let trust = match self.mesh.join() {
            Ok(table) => Some(table),
            Err(_) => {
                warn!("Mesh thread panicked");
                None
            }
        };
        let transport = self.transport.join();
        let bus = self.bus_thread.join().unwrap_or_else(|_| {
            warn!("Bus thread panicked");
            BusStats::default()
        });

        NodeReport {
            bus,
            transport,
            playout,
            trust,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::config::AppConfig;
    use crate::identity::DeviceId;
    use crate::protocol::{Announce, Message};
    use std::net::UdpSocket;
    use std::time::Duration;

    fn context() -> Arc<Context> {
        let mut config = AppConfig::default();
        config.discovery.port = 0;
        Context::new(DeviceId::random(), config)
    }

    #[test]
    fn test_peer_announcing_at_startup_reaches_mesh() {
        let node = Node::start(context()).unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], node.local_addr().port()));

        // Announce the moment the node is up, before anything else happens
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        let announce = codec::encode(&Message::Announce(Announce::new("early-peer"))).unwrap();
        remote.send_to(&announce, target).unwrap();

        std::thread::sleep(Duration::from_millis(300));
        let report = node.shutdown();

        let trust = report.trust.unwrap();
        let device = trust.device("early-peer").unwrap();
        assert!(device.online);
        assert!(!device.allowed);
        assert_eq!(report.bus.unrouted, 0);
    }

    #[test]
    fn test_shutdown_joins_every_worker() {
        let mut node = Node::start(context()).unwrap();
        let signal = node.shutdown_signal();
        assert!(!signal.is_triggered());

        node.begin_shutdown();
        assert!(signal.is_triggered());

        let report = node.shutdown();
        assert!(report.trust.is_some());
        assert_eq!(report.playout.received, 0);
    }
}
