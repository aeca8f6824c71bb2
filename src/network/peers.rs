//! Peer table
//!
//! Owned by the transport loop only. Time is passed in explicitly so the
//! liveness rules can be exercised without sleeping.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A device heard on the network
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

/// Known peers keyed by device id
pub struct PeerTable {
    peers: HashMap<String, Peer>,
    timeout: Duration,
}

impl PeerTable {
    /// Peers silent for longer than `timeout` are evicted by [`sweep`](Self::sweep)
    pub fn new(timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            timeout,
        }
    }

    /// Record an announce. Returns true if the peer was not known.
    pub fn observe(&mut self, id: &str, address: SocketAddr, now: Instant) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.address = address;
                peer.last_seen = now;
                false
            }
            None => {
                self.peers.insert(
                    id.to_string(),
                    Peer {
                        id: id.to_string(),
                        address,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Remove and return the ids of every peer silent for too long
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|peer| now.saturating_duration_since(peer.last_seen) > timeout)
            .map(|peer| peer.id.clone())
            .collect();

        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    /// Addresses a write request resolves to
    pub fn resolve(&self, target: &str, broadcast: bool) -> Vec<SocketAddr> {
        if broadcast {
            self.peers.values().map(|peer| peer.address).collect()
        } else {
            self.peers
                .get(target)
                .map(|peer| vec![peer.address])
                .unwrap_or_default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
