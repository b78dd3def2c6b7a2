//! Per-peer sync state.

use basalt_chain::{BlockHandle, BlockHash};
use std::net::SocketAddr;

/// Everything the request manager tracks about one connected peer.
///
/// Block references are index handles, never owning pointers; the index
/// outlives every peer.
#[derive(Debug, Clone)]
pub struct PeerSyncState {
    /// Endpoint address, fixed at connect.
    pub addr: SocketAddr,
    /// Human-readable endpoint name, fixed at connect.
    pub addr_name: String,
    /// Deepest block with non-zero work this peer is known to hold.
    pub best_known_block: Option<BlockHandle>,
    /// Deepest header we have announced to this peer.
    pub best_header_sent: Option<BlockHandle>,
    /// Deepest block on a chain shared with `best_known_block`. Normally
    /// only moves forward; rewound when the peer reorganizes.
    pub last_common_block: Option<BlockHandle>,
    /// Latest announced hash the index does not know yet. Cleared once the
    /// index learns it and it is promoted into `best_known_block`.
    pub hash_last_unknown: Option<BlockHash>,
    /// Peer asked for header announcements instead of invs.
    pub prefer_headers: bool,
    /// Peer qualifies as a primary block source.
    pub preferred_download: bool,
    /// Initial `getheaders` has been sent.
    pub sync_started: bool,
    /// The initial `getheaders` was answered at an acceptable height.
    pub first_headers_received: bool,
    /// Active tip height at the moment `sync_started` flipped true; the
    /// bar the first headers response must clear.
    pub first_headers_expected_height: u32,
    /// Unix time of the last sync (re)start; callers use it for stall
    /// timeouts.
    pub sync_start_time: i64,
}

impl PeerSyncState {
    /// Fresh state for a newly connected peer.
    pub fn new(addr: SocketAddr, addr_name: String) -> Self {
        Self {
            addr,
            addr_name,
            best_known_block: None,
            best_header_sent: None,
            last_common_block: None,
            hash_last_unknown: None,
            prefer_headers: false,
            preferred_download: false,
            sync_started: false,
            first_headers_received: false,
            first_headers_expected_height: 0,
            sync_start_time: 0,
        }
    }
}

/// Read-only snapshot of a peer's sync progress.
#[derive(Debug, Clone, Default)]
pub struct PeerStats {
    /// Height of `best_known_block`, -1 when unknown.
    pub sync_height: i64,
    /// Height of `last_common_block`, -1 when unknown.
    pub common_height: i64,
    /// Heights of blocks in flight to this peer, ascending.
    pub in_flight_heights: Vec<u32>,
    /// Number of blocks in flight to this peer, including ones whose index
    /// entry was unknown at request time.
    pub in_flight_count: usize,
    /// Whether the peer asked for header announcements instead of invs.
    pub prefer_headers: bool,
    /// Whether the initial `getheaders` has been sent.
    pub sync_started: bool,
    /// Whether the initial headers response has arrived.
    pub first_headers_received: bool,
    /// Unix time of the last sync (re)start.
    pub sync_start_time: i64,
}
