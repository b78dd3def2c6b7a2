//! The request manager.
//!
//! One instance per node. Message handlers and the periodic sync tick call
//! in concurrently; per-peer state and the in-flight ledger live behind a
//! single readers-writer lock. Where an operation needs both the chain
//! lock and this one, the chain lock is taken first, always.

use crate::clock::Clock;
use crate::inflight::InFlightLedger;
use crate::peer::{PeerStats, PeerSyncState};
use crate::relay::RelayCache;
use crate::{
    ANCESTOR_WALK_BATCH, BLOCK_DOWNLOAD_WINDOW, MAX_BLOCKS_IN_FLIGHT_PER_PEER,
    STALE_HEADER_AGE_SECS,
};
use basalt_chain::{BlockHandle, BlockHash, ChainInner, ChainState, Validity};
use basalt_net::{Inv, Locator, PeerId, PeerInfo, PeerLink, TxId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether the node already has a block on disk or in the validation
/// pipeline. Implemented by the node shell; tests use a set.
pub trait BlockHave: Send + Sync {
    /// True if requesting this block again would be wasted work.
    fn already_have_block(&self, hash: &BlockHash) -> bool;
}

/// Process-wide flags the download policy consults.
///
/// Owned by the node root and shared by `Arc`; the preferred-download
/// counter is maintained by the request manager itself.
#[derive(Default)]
pub struct NodeFlags {
    /// Block import from disk is in progress.
    pub importing: AtomicBool,
    /// Index rebuild is in progress.
    pub reindex: AtomicBool,
    preferred_download: AtomicI32,
}

impl NodeFlags {
    /// Fresh flags, nothing in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected peers currently marked preferred-download.
    pub fn preferred_download_count(&self) -> i32 {
        self.preferred_download.load(Ordering::Relaxed)
    }
}

/// Peer map and in-flight ledger, guarded together so a reader always sees
/// the counters agree with the map.
#[derive(Default)]
struct ManagerInner {
    peers: HashMap<PeerId, PeerSyncState>,
    in_flight: InFlightLedger,
}

impl ManagerInner {
    /// Peer state, aborting on an unregistered peer: every caller of the
    /// mutating operations registers the peer first, so absence here is
    /// upstream misuse.
    fn peer(&self, peer: PeerId) -> &PeerSyncState {
        self.peers
            .get(&peer)
            .unwrap_or_else(|| panic!("peer {peer} is not registered"))
    }

    fn peer_mut(&mut self, peer: PeerId) -> &mut PeerSyncState {
        self.peers
            .get_mut(&peer)
            .unwrap_or_else(|| panic!("peer {peer} is not registered"))
    }
}

/// If the peer's last-unknown hash is now indexed with work, promote it
/// into `best_known_block` and clear it.
fn promote_last_unknown(chain: &ChainInner, state: &mut PeerSyncState) {
    let Some(hash) = state.hash_last_unknown else {
        return;
    };
    let Some(handle) = chain.lookup(&hash) else {
        return;
    };
    let work = chain.index.entry(handle).chain_work;
    if work == 0 {
        return;
    }
    let dominates = state
        .best_known_block
        .is_none_or(|best| work >= chain.index.entry(best).chain_work);
    if dominates {
        state.best_known_block = Some(handle);
    }
    state.hash_last_unknown = None;
}

/// Decides which headers and blocks to request from which peer.
pub struct RequestManager {
    chain: Arc<ChainState>,
    link: Arc<dyn PeerLink>,
    have: Arc<dyn BlockHave>,
    clock: Arc<dyn Clock>,
    flags: Arc<NodeFlags>,
    inner: RwLock<ManagerInner>,
    relay: RelayCache,
}

impl RequestManager {
    /// Wire up a manager against its collaborators.
    pub fn new(
        chain: Arc<ChainState>,
        link: Arc<dyn PeerLink>,
        have: Arc<dyn BlockHave>,
        clock: Arc<dyn Clock>,
        flags: Arc<NodeFlags>,
    ) -> Self {
        Self {
            chain,
            link,
            have,
            clock,
            flags,
            inner: RwLock::new(ManagerInner::default()),
            relay: RelayCache::new(),
        }
    }

    // ---- peer lifecycle ----------------------------------------------

    /// Register a freshly connected peer. Registering the same id twice is
    /// upstream misuse and aborts.
    pub fn initialize_peer(&self, peer: PeerId, addr: SocketAddr, addr_name: String) {
        let mut inner = self.inner.write();
        let previous = inner
            .peers
            .insert(peer, PeerSyncState::new(addr, addr_name));
        assert!(previous.is_none(), "peer {peer} initialized twice");
        inner.in_flight.init_peer(peer);
        debug!(peer = %peer, "peer registered");
    }

    /// Drop a disconnected peer: release its in-flight blocks and its
    /// preferred-download contribution. Unknown ids are ignored so the
    /// disconnect path can race the connect path.
    pub fn remove_peer(&self, peer: PeerId) {
        let mut inner = self.inner.write();
        let Some(state) = inner.peers.remove(&peer) else {
            debug!(peer = %peer, "remove for unknown peer ignored");
            return;
        };
        if state.preferred_download {
            self.flags.preferred_download.fetch_sub(1, Ordering::Relaxed);
        }
        let released = inner.in_flight.drop_peer(peer);
        if !released.is_empty() {
            debug!(peer = %peer, released = released.len(), "released in-flight blocks");
        }
    }

    /// Recompute whether this peer is a preferred download source.
    /// One-shot and filtered-only peers never qualify; everyone else does,
    /// inbound included, since the most-work rule picks between chains.
    pub fn update_preferred_download(&self, peer: PeerId, one_shot: bool, client: bool) {
        let mut inner = self.inner.write();
        let state = inner.peer_mut(peer);
        self.flags
            .preferred_download
            .fetch_sub(state.preferred_download as i32, Ordering::Relaxed);
        state.preferred_download = !one_shot && !client;
        self.flags
            .preferred_download
            .fetch_add(state.preferred_download as i32, Ordering::Relaxed);
    }

    /// Record that the peer asked for header announcements.
    pub fn set_prefer_headers(&self, peer: PeerId) {
        self.inner.write().peer_mut(peer).prefer_headers = true;
    }

    /// Whether the peer asked for header announcements.
    pub fn prefer_headers(&self, peer: PeerId) -> bool {
        self.inner.read().peer(peer).prefer_headers
    }

    /// Record the deepest header we have pushed to this peer.
    pub fn set_best_header_sent(&self, peer: PeerId, handle: BlockHandle) {
        self.inner.write().peer_mut(peer).best_header_sent = Some(handle);
    }

    /// Whether the peer is known to have `handle`: it is an ancestor of
    /// either their best known block or the best header we sent them.
    pub fn peer_has_header(&self, peer: PeerId, handle: BlockHandle) -> bool {
        let chain = self.chain.read();
        let inner = self.inner.read();
        let state = inner.peer(peer);
        let height = chain.index.entry(handle).height;
        for root in [state.best_known_block, state.best_header_sent]
            .into_iter()
            .flatten()
        {
            if chain.index.ancestor_of(root, height) == Some(handle) {
                return true;
            }
        }
        false
    }

    // ---- block availability ------------------------------------------

    /// Absorb a block announcement from `peer`.
    ///
    /// Known hashes with work move `best_known_block` forward; unknown
    /// ones overwrite `hash_last_unknown` on the assumption that the
    /// latest announcement is the peer's best.
    pub fn update_block_availability(&self, peer: PeerId, hash: BlockHash) {
        let chain = self.chain.read();
        let resolved = chain.lookup(&hash);
        let mut inner = self.inner.write();
        let state = inner.peer_mut(peer);
        promote_last_unknown(&chain, state);

        match resolved {
            Some(handle) if chain.index.entry(handle).chain_work > 0 => {
                let work = chain.index.entry(handle).chain_work;
                let dominates = state
                    .best_known_block
                    .is_none_or(|best| work >= chain.index.entry(best).chain_work);
                if dominates {
                    debug!(peer = %peer, hash = %hash, "updated best known block");
                    state.best_known_block = Some(handle);
                }
            }
            _ => {
                debug!(peer = %peer, hash = %hash, "recorded last unknown block");
                state.hash_last_unknown = Some(hash);
            }
        }
    }

    /// Promote the peer's pending unknown hash if the index has since
    /// learned it. Idempotent.
    pub fn process_block_availability(&self, peer: PeerId) {
        let chain = self.chain.read();
        let mut inner = self.inner.write();
        promote_last_unknown(&chain, inner.peer_mut(peer));
    }

    /// Peers whose best known block has strictly less work than `new_tip`
    /// (or none at all); the caller announces the new block to these.
    pub fn update_best_known_block_all(&self, new_tip: BlockHandle) -> Vec<PeerId> {
        let chain = self.chain.read();
        let inner = self.inner.read();
        let tip_work = chain.index.entry(new_tip).chain_work;
        inner
            .peers
            .iter()
            .filter(|(_, state)| {
                state
                    .best_known_block
                    .is_none_or(|best| chain.index.entry(best).chain_work < tip_work)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    // ---- in-flight ledger --------------------------------------------

    /// Record `hash` as requested from `peer`.
    pub fn mark_block_in_flight(&self, peer: PeerId, hash: BlockHash, index: Option<BlockHandle>) {
        self.inner.write().in_flight.mark_in_flight(peer, hash, index);
    }

    /// Release `hash` from the ledger; returns whether we had requested it.
    /// Called on `block` receipt, before validation.
    pub fn mark_block_received(&self, hash: &BlockHash) -> bool {
        self.inner.write().in_flight.mark_received(hash)
    }

    /// Whether `hash` is currently requested from any peer.
    pub fn is_block_in_flight(&self, hash: &BlockHash) -> bool {
        self.inner.read().in_flight.is_in_flight(hash)
    }

    /// Alias of [`RequestManager::is_block_in_flight`].
    pub fn already_asked_for_block(&self, hash: &BlockHash) -> bool {
        self.is_block_in_flight(hash)
    }

    /// Number of blocks in flight to `peer`.
    pub fn blocks_in_flight(&self, peer: PeerId) -> usize {
        self.inner.read().in_flight.count(peer)
    }

    /// Number of blocks in flight overall.
    pub fn total_blocks_in_flight(&self) -> usize {
        self.inner.read().in_flight.len()
    }

    /// Snapshot of a peer's sync progress, or `None` for an unknown peer.
    pub fn node_state_stats(&self, peer: PeerId) -> Option<PeerStats> {
        let chain = self.chain.read();
        let inner = self.inner.read();
        let state = inner.peers.get(&peer)?;
        let mut heights: Vec<u32> = inner
            .in_flight
            .entries_for(peer)
            .into_iter()
            .map(|handle| chain.index.entry(handle).height)
            .collect();
        heights.sort_unstable();
        Some(PeerStats {
            sync_height: state
                .best_known_block
                .map_or(-1, |h| i64::from(chain.index.entry(h).height)),
            common_height: state
                .last_common_block
                .map_or(-1, |h| i64::from(chain.index.entry(h).height)),
            in_flight_heights: heights,
            in_flight_count: inner.in_flight.count(peer),
            prefer_headers: state.prefer_headers,
            sync_started: state.sync_started,
            first_headers_received: state.first_headers_received,
            sync_start_time: state.sync_start_time,
        })
    }

    // ---- sync start --------------------------------------------------

    /// Issue the initial `getheaders` to an eligible peer.
    ///
    /// Eligible: full peer, sync not yet started, node not importing or
    /// reindexing, and either the peer is a fetch candidate or our best
    /// header is less than a day old.
    pub fn start_download(&self, peer: &PeerInfo) {
        if self.flags.importing.load(Ordering::Relaxed)
            || self.flags.reindex.load(Ordering::Relaxed)
            || peer.client
        {
            return;
        }
        let chain = self.chain.read();
        let now = self.clock.adjusted_now();
        let mut request = None;
        {
            let mut inner = self.inner.write();
            let state = inner.peer_mut(peer.id);
            if state.sync_started {
                return;
            }
            let Some(best_header) = chain.best_header() else {
                return;
            };
            let fetch = state.preferred_download
                || (self.flags.preferred_download_count() == 0 && !peer.one_shot);
            let header_entry = chain.index.entry(best_header);
            if fetch || header_entry.time > now - STALE_HEADER_AGE_SECS {
                state.sync_started = true;
                state.first_headers_expected_height = chain.tip_height();
                // Start one block early so an up-to-date peer still answers
                // with at least one header, which primes its best known
                // block; starting at the best header itself could get an
                // empty response.
                let start = header_entry.prev.unwrap_or(best_header);
                info!(
                    peer = %peer.id,
                    start_height = chain.index.entry(start).height,
                    "initial getheaders"
                );
                request = Some(Locator::new(chain.locator(start)));
            }
        }
        if let Some(locator) = request {
            if let Err(err) = self.link.send_getheaders(peer.id, locator, BlockHash::ZERO) {
                warn!(peer = %peer.id, %err, "failed to queue getheaders");
            }
        }
    }

    /// Accept the initial headers response if it reaches the height we
    /// were at when sync started. A peer advertising a competitive chain
    /// must clear that bar; anything lower is stale or dishonest.
    pub fn set_peer_first_header_received(&self, peer: PeerId, last: BlockHandle) {
        let chain = self.chain.read();
        let mut inner = self.inner.write();
        let state = inner.peer_mut(peer);
        if !state.first_headers_received
            && chain.index.entry(last).height >= state.first_headers_expected_height
        {
            state.first_headers_received = true;
            info!(peer = %peer, "initial headers received");
        }
    }

    /// Stamp the peer's sync start time; the caller uses it to drop peers
    /// that stall.
    pub fn set_peer_sync_start_time(&self, peer: PeerId) {
        let now = self.clock.unix_now();
        self.inner.write().peer_mut(peer).sync_start_time = now;
    }

    // ---- download scheduling -----------------------------------------

    /// Extend `out` with up to `count` blocks this peer should supply,
    /// repairing `last_common_block` first. Skips blocks we have, blocks
    /// in flight to anyone, and blocks past the download window.
    pub fn find_next_blocks_to_download(
        &self,
        peer: PeerId,
        count: usize,
        out: &mut Vec<BlockHandle>,
    ) {
        if count == 0 {
            return;
        }
        let chain = self.chain.read();
        let mut inner = self.inner.write();
        let ManagerInner { peers, in_flight } = &mut *inner;
        let state = peers
            .get_mut(&peer)
            .unwrap_or_else(|| panic!("peer {peer} is not registered"));

        promote_last_unknown(&chain, state);
        let Some(best_known) = state.best_known_block else {
            debug!(peer = %peer, "no best known block, not requesting");
            return;
        };
        let Some(tip) = chain.active.tip() else {
            return;
        };
        if chain.index.entry(best_known).chain_work < chain.index.entry(tip).chain_work {
            debug!(peer = %peer, "peer's chain has less work than our tip, not requesting");
            return;
        }

        if state.last_common_block.is_none() {
            // Bootstrap with a guess on the active chain; the ancestor
            // repair below corrects a wrong guess in either direction.
            let seed = chain
                .index
                .entry(best_known)
                .height
                .min(chain.active.height());
            state.last_common_block = chain.active.at(seed);
        }
        // After a peer reorg the recorded common block may no longer be an
        // ancestor of their tip; walk back to the real meeting point.
        let last_common = chain
            .index
            .last_common_ancestor(state.last_common_block.expect("seeded above"), best_known);
        state.last_common_block = Some(last_common);
        if last_common == best_known {
            return;
        }

        let window_end = chain.active.height() + BLOCK_DOWNLOAD_WINDOW;
        let max_height = chain.index.entry(best_known).height.min(window_end + 1);
        let mut walk = last_common;
        let mut batch: Vec<BlockHandle> = Vec::new();
        while chain.index.entry(walk).height < max_height {
            // Materialize successors of `walk` toward the peer's tip. At
            // least ANCESTOR_WALK_BATCH at a time: one ancestor jump costs
            // about as much as a hundred prev steps.
            let walk_height = chain.index.entry(walk).height;
            let want = count
                .saturating_sub(out.len())
                .max(ANCESTOR_WALK_BATCH as usize) as u32;
            let to_fetch = (max_height - walk_height).min(want);
            walk = chain
                .index
                .ancestor_of(best_known, walk_height + to_fetch)
                .expect("bounded by the best known height");
            batch.clear();
            batch.resize(to_fetch as usize, walk);
            for i in (1..to_fetch as usize).rev() {
                batch[i - 1] = chain
                    .index
                    .entry(batch[i])
                    .prev
                    .expect("walk stays above genesis");
            }

            for &candidate in &batch {
                let entry = chain.index.entry(candidate);
                if in_flight.is_in_flight(&entry.hash) {
                    // First requester keeps sole ownership until it drops
                    // the block; no second-sourcing.
                    continue;
                }
                if !entry.is_valid(Validity::Tree) {
                    debug!(peer = %peer, hash = %entry.hash, "peer is on an invalid chain, abandoning");
                    return;
                }
                if entry.has_data || chain.active.contains(&chain.index, candidate) {
                    if entry.chain_tx > 0 {
                        state.last_common_block = Some(candidate);
                    }
                } else if entry.height > window_end {
                    return;
                } else {
                    out.push(candidate);
                    if out.len() == count {
                        return;
                    }
                }
            }
        }
    }

    /// Fill the peer's in-flight allowance with a `getdata`.
    pub fn request_next_blocks_to_download(&self, peer: &PeerInfo) {
        let in_flight = self.blocks_in_flight(peer.id);
        if peer.disconnecting || peer.client || in_flight >= MAX_BLOCKS_IN_FLIGHT_PER_PEER {
            return;
        }

        let mut picks = Vec::new();
        self.find_next_blocks_to_download(
            peer.id,
            MAX_BLOCKS_IN_FLIGHT_PER_PEER - in_flight,
            &mut picks,
        );
        if picks.is_empty() {
            debug!(peer = %peer.id, "no blocks to download");
            return;
        }

        // Drop blocks the node already holds outside the index walk.
        let wanted: Vec<(BlockHash, BlockHandle)> = {
            let chain = self.chain.read();
            picks
                .into_iter()
                .map(|handle| (chain.index.entry(handle).hash, handle))
                .filter(|(hash, _)| !self.have.already_have_block(hash))
                .collect()
        };
        if wanted.is_empty() {
            debug!(peer = %peer.id, "all candidates already stored");
            return;
        }

        // Re-check the ledger: another handler may have requested some of
        // these since the walk released the lock.
        let to_request: Vec<(BlockHash, BlockHandle)> = {
            let inner = self.inner.read();
            wanted
                .into_iter()
                .filter(|(hash, _)| {
                    if inner.in_flight.is_in_flight(hash) {
                        debug!(hash = %hash, "block already in flight, skipping");
                        false
                    } else {
                        true
                    }
                })
                .collect()
        };
        if to_request.is_empty() {
            debug!(peer = %peer.id, "every candidate already in flight");
            return;
        }

        let inv: Vec<Inv> = to_request
            .iter()
            .map(|(hash, _)| Inv::Block(*hash))
            .collect();
        if let Err(err) = self.link.send_getdata(peer.id, inv) {
            warn!(peer = %peer.id, %err, "failed to queue getdata");
            return;
        }
        let mut inner = self.inner.write();
        for &(hash, handle) in &to_request {
            inner.in_flight.mark_in_flight(peer.id, hash, Some(handle));
        }
        debug!(peer = %peer.id, count = to_request.len(), "requested blocks");
    }

    // ---- transaction relay -------------------------------------------

    /// Remember a locally accepted transaction for `getdata` re-requests.
    pub fn track_tx_relay(&self, txid: TxId, raw: Vec<u8>) {
        self.relay.track(txid, raw, self.clock.unix_now());
    }

    /// Answer a `getdata(tx)`: push the transaction if still cached.
    pub fn find_and_push_tx(&self, peer: PeerId, txid: &TxId) -> bool {
        match self.relay.find(txid) {
            Some(raw) => {
                if let Err(err) = self.link.send_tx(peer, raw.as_ref().clone()) {
                    warn!(peer = %peer, %err, "failed to queue tx");
                }
                true
            }
            None => false,
        }
    }
}
