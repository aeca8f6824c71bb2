//! Mesh trust state machine and its bus service

use crossbeam_channel::{select, Receiver};
use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::bus::BusHandle;
use crate::codec;
use crate::constants::MAILBOX_CAPACITY;
use crate::context::Context;
use crate::error::{Error, ProtocolError};
use crate::mesh::device::Device;
use crate::protocol::{DeviceStatus, Message, Opcode, WriteRequest};
use crate::shutdown::ShutdownSignal;

/// Trust records of every device this node has heard of, itself included.
///
/// Records are never removed: a device going offline keeps its trust, and a
/// reconnect does not reset it.
#[derive(Debug, Clone)]
pub struct TrustTable {
    self_id: String,
    auto_accept: bool,
    devices: BTreeMap<String, Device>,
}

impl TrustTable {
    pub fn new(self_id: impl Into<String>, auto_accept: bool) -> Self {
        let self_id = self_id.into();
        let mut devices = BTreeMap::new();
        devices.insert(self_id.clone(), Device::new(self_id.clone(), auto_accept));

        Self {
            self_id,
            auto_accept,
            devices,
        }
    }

    /// Apply one bus message. Returns the write requests it triggers.
    pub fn apply(&mut self, message: &Message) -> Result<Vec<WriteRequest>, ProtocolError> {
        match message {
            Message::PeerOnline(online) => self.peer_online(&online.device_id),
            Message::PeerOffline(offline) => {
                self.peer_offline(&offline.device_id);
                Ok(Vec::new())
            }
            Message::DeviceStatus(status) => {
                self.set_allowed(&status.device_id, status.allowed);
                Ok(Vec::new())
            }
            other => {
                debug!("Mesh ignoring {:?}", other.opcode());
                Ok(Vec::new())
            }
        }
    }

    /// One broadcast trust message per known device
    pub fn snapshot(&self) -> Result<Vec<WriteRequest>, ProtocolError> {
        self.devices
            .values()
            .map(|device| {
                codec::encode(&Message::DeviceStatus(device.status())).map(WriteRequest::broadcast)
            })
            .collect()
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    fn peer_online(&mut self, id: &str) -> Result<Vec<WriteRequest>, ProtocolError> {
        if let Some(device) = self.devices.get_mut(id) {
            device.online = true;
            info!("Device {} is back online", id);
            return Ok(Vec::new());
        }

        self.devices
            .insert(id.to_string(), Device::new(id, self.auto_accept));
        debug!("New device {}", id);

        if !self.auto_accept {
            return Ok(Vec::new());
        }

        info!("Auto accepting device {}", id);
        self.snapshot()
    }

    fn peer_offline(&mut self, id: &str) {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.online = false;
                warn!("Device {} went offline", id);
            }
            None => debug!("Offline notice for unknown device {}", id),
        }
    }

    fn set_allowed(&mut self, id: &str, allowed: bool) {
        let Some(device) = self.devices.get_mut(id) else {
            debug!("Trust change for unknown device {}", id);
            return;
        };
        if device.allowed == allowed {
            return;
        }

        device.allowed = allowed;
        if allowed {
            info!("Accepted device {}", id);
        } else {
            warn!("Evicted device {}", id);
        }
    }
}

/// Runs a [`TrustTable`] on its own thread, fed by the bus
pub struct MeshService {
    table: TrustTable,
    bus: BusHandle,
    mailbox: Receiver<Message>,
}

impl MeshService {
    pub fn new(ctx: &Context, bus: BusHandle) -> Result<Self, Error> {
        let mailbox = bus.subscribe(
            "mesh",
            &[Opcode::PeerOnline, Opcode::PeerOffline, Opcode::DeviceStatus],
            MAILBOX_CAPACITY,
        )?;

        Ok(Self {
            table: TrustTable::new(ctx.device_name(), ctx.config.mesh.auto_accept),
            bus,
            mailbox,
        })
    }

    /// Start the mesh thread. It hands back the final table when it stops.
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<JoinHandle<TrustTable>, Error> {
        let MeshService {
            mut table,
            bus,
            mailbox,
        } = self;

        let handle = thread::Builder::new()
            .name("mesh".into())
            .spawn(move || {
                info!("Mesh started as {}", table.self_id());
                loop {
                    select! {
                        recv(mailbox) -> message => match message {
                            Ok(message) => react(&mut table, &bus, &message),
                            Err(_) => break,
                        },
                        recv(shutdown.receiver()) -> _ => break,
                    }
                }
                info!("Mesh stopped with {} known devices", table.len());
                table
            })?;
        Ok(handle)
    }
}

fn react(table: &mut TrustTable, bus: &BusHandle, message: &Message) {
    let requests = match table.apply(message) {
        Ok(requests) => requests,
        Err(e) => {
            warn!("Could not encode mesh state: {}", e);
            return;
        }
    };

    for request in requests {
        if let Err(e) = bus.publish(request) {
            debug!("Mesh could not publish: {}", e);
            return;
        }
    }
}

/// Change a device's trust locally and tell the rest of the mesh
pub fn request_trust_change(bus: &BusHandle, device_id: &str, allowed: bool) -> Result<(), Error> {
    let status = DeviceStatus {
        device_id: device_id.to_string(),
        allowed,
    };
    let frame = codec::encode(&Message::DeviceStatus(status.clone()))?;

    bus.publish(status)?;
    bus.publish(WriteRequest::broadcast(frame))?;
    Ok(())
}
