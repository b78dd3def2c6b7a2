//! Peer identity and the connected-peer directory.

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// Unique per-connection peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection-level facts about a peer, fixed at handshake except for
/// `disconnecting`.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer identifier.
    pub id: PeerId,
    /// Socket address.
    pub addr: SocketAddr,
    /// Human-readable endpoint name.
    pub addr_name: String,
    /// Short-lived connection made for a single query; never a download
    /// source.
    pub one_shot: bool,
    /// Light / filtered-only client that does not serve full blocks.
    pub client: bool,
    /// Disconnect has been requested; stop scheduling work.
    pub disconnecting: bool,
}

impl PeerInfo {
    /// Describe a freshly handshaked full peer.
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            addr_name: addr.to_string(),
            one_shot: false,
            client: false,
            disconnecting: false,
        }
    }
}

/// Directory of currently connected peers, shared between the dispatch
/// loop and the sync tick.
#[derive(Default)]
pub struct PeerDirectory {
    peers: DashMap<PeerId, PeerInfo>,
}

impl PeerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected peer.
    pub fn insert(&self, info: PeerInfo) {
        debug!(peer = %info.id, addr = %info.addr_name, "peer joined directory");
        self.peers.insert(info.id, info);
    }

    /// Drop a disconnected peer.
    pub fn remove(&self, id: PeerId) -> Option<PeerInfo> {
        debug!(peer = %id, "peer left directory");
        self.peers.remove(&id).map(|(_, info)| info)
    }

    /// Snapshot of one peer.
    pub fn get(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.get(&id).map(|r| r.clone())
    }

    /// Flag a peer for disconnection.
    pub fn mark_disconnecting(&self, id: PeerId) {
        if let Some(mut info) = self.peers.get_mut(&id) {
            info.disconnecting = true;
        }
    }

    /// Snapshot of all connected peers.
    pub fn connected(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|r| r.clone()).collect()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u64) -> PeerInfo {
        PeerInfo::new(PeerId(id), format!("10.0.0.{id}:9333").parse().unwrap())
    }

    #[test]
    fn test_directory_roundtrip() {
        let dir = PeerDirectory::new();
        dir.insert(info(1));
        dir.insert(info(2));

        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get(PeerId(1)).unwrap().addr_name, "10.0.0.1:9333");

        let removed = dir.remove(PeerId(1)).unwrap();
        assert_eq!(removed.id, PeerId(1));
        assert!(dir.get(PeerId(1)).is_none());
    }

    #[test]
    fn test_mark_disconnecting() {
        let dir = PeerDirectory::new();
        dir.insert(info(7));
        dir.mark_disconnecting(PeerId(7));

        assert!(dir.get(PeerId(7)).unwrap().disconnecting);
    }
}
