//! Node wiring: message dispatch and the sync scheduler tick.
//!
//! Maps transport events onto the request manager and runs the ~1 Hz tick
//! that starts header sync and keeps download pipelines full. Validation,
//! persistence, and the transport itself live elsewhere and connect
//! through the event channel and the outbound link.

use crate::config::NodeConfig;
use anyhow::Result;
use basalt_chain::{BlockHandle, BlockHash, ChainError, ChainState};
use basalt_net::{
    ChannelLink, Message, PeerDirectory, PeerId, PeerInfo, TxId, MAX_HEADERS_PER_MSG,
    MAX_INV_PER_MSG,
};
use basalt_sync::{BlockHave, Clock, NodeFlags, RequestManager, SyncResult, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A header as delivered by a `headers` message, already past the
/// stateless checks the transport layer performs.
#[derive(Debug, Clone)]
pub struct HeaderAnnounce {
    /// Header hash.
    pub hash: BlockHash,
    /// Parent hash.
    pub parent: BlockHash,
    /// Proof-of-work of this single block.
    pub work: u128,
    /// Header timestamp, unix seconds.
    pub time: i64,
}

/// Events the transport feeds into the node.
#[derive(Debug)]
pub enum PeerEvent {
    /// A peer finished its handshake.
    Connected { info: PeerInfo },
    /// A peer went away.
    Disconnected { peer: PeerId },
    /// A `headers` batch arrived.
    Headers {
        peer: PeerId,
        headers: Vec<HeaderAnnounce>,
    },
    /// Block hashes from an `inv`.
    BlockInv { peer: PeerId, hashes: Vec<BlockHash> },
    /// A full block arrived; validation happens downstream.
    Block { peer: PeerId, hash: BlockHash },
    /// The peer sent `sendheaders`: announce new blocks to it with headers
    /// rather than invs.
    SendHeaders { peer: PeerId },
    /// A peer re-requested a transaction.
    GetDataTx { peer: PeerId, txid: TxId },
    /// The mempool accepted a local or relayed transaction.
    TxAccepted { txid: TxId, raw: Vec<u8> },
}

/// Answers "do we already have this block" from the index.
struct ChainHave {
    chain: Arc<ChainState>,
}

impl BlockHave for ChainHave {
    fn already_have_block(&self, hash: &BlockHash) -> bool {
        let chain = self.chain.read();
        chain
            .lookup(hash)
            .is_some_and(|handle| chain.index.entry(handle).has_data)
    }
}

/// Genesis parameters per network.
fn genesis_for(network: &str) -> (BlockHash, i64) {
    match network {
        "testnet" => (BlockHash([0x42; 32]), 1_598_918_400),
        _ => (BlockHash([0x41; 32]), 1_598_918_400),
    }
}

/// The running node.
pub struct Node {
    config: NodeConfig,
    chain: Arc<ChainState>,
    directory: Arc<PeerDirectory>,
    manager: Arc<RequestManager>,
    clock: Arc<SystemClock>,
    events: Option<mpsc::Receiver<PeerEvent>>,
}

impl Node {
    /// Build a node: chain with genesis, request manager, event plumbing.
    ///
    /// Returns the node, the sender the transport uses to feed events, and
    /// the receiver carrying outbound `(peer, message)` pairs.
    pub fn new(
        config: NodeConfig,
    ) -> (
        Self,
        mpsc::Sender<PeerEvent>,
        mpsc::UnboundedReceiver<(PeerId, Message)>,
    ) {
        let (genesis_hash, genesis_time) = genesis_for(&config.network);
        let chain = Arc::new(ChainState::with_genesis(genesis_hash, 1, genesis_time));
        let (link, outbound_rx) = ChannelLink::new();
        let clock = Arc::new(SystemClock);
        let flags = Arc::new(NodeFlags::new());
        let manager = Arc::new(RequestManager::new(
            chain.clone(),
            Arc::new(link),
            Arc::new(ChainHave {
                chain: chain.clone(),
            }),
            clock.clone(),
            flags,
        ));
        let (events_tx, events_rx) = mpsc::channel(1024);

        let node = Self {
            config,
            chain,
            directory: Arc::new(PeerDirectory::new()),
            manager,
            clock,
            events: Some(events_rx),
        };
        (node, events_tx, outbound_rx)
    }

    /// The request manager, for observability surfaces.
    pub fn manager(&self) -> &RequestManager {
        &self.manager
    }

    /// Run dispatch and the sync tick until the event channel closes.
    pub async fn run(mut self) -> Result<()> {
        let mut events = self.events.take().expect("run called once");
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.sync.tick_interval_secs.max(1)));
        info!(node = %self.config.node_name, "node running");

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick(),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("event channel closed");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Dispatch one transport event to the request manager.
    pub fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { info } => self.on_connected(info),
            PeerEvent::Disconnected { peer } => self.on_disconnected(peer),
            PeerEvent::Headers { peer, headers } => {
                if let Err(err) = self.on_headers(peer, headers) {
                    warn!(peer = %peer, %err, "headers batch rejected");
                }
            }
            PeerEvent::BlockInv { peer, hashes } => self.on_block_inv(peer, hashes),
            PeerEvent::Block { peer, hash } => self.on_block(peer, hash),
            PeerEvent::SendHeaders { peer } => self.manager.set_prefer_headers(peer),
            PeerEvent::GetDataTx { peer, txid } => {
                if !self.manager.find_and_push_tx(peer, &txid) {
                    debug!(peer = %peer, txid = %txid, "tx not in relay cache");
                }
            }
            PeerEvent::TxAccepted { txid, raw } => self.manager.track_tx_relay(txid, raw),
        }
    }

    fn on_connected(&self, info: PeerInfo) {
        debug!(peer = %info.id, addr = %info.addr_name, "peer connected");
        self.manager
            .initialize_peer(info.id, info.addr, info.addr_name.clone());
        self.manager
            .update_preferred_download(info.id, info.one_shot, info.client);
        self.directory.insert(info);
    }

    fn on_disconnected(&self, peer: PeerId) {
        debug!(peer = %peer, "peer disconnected");
        self.directory.remove(peer);
        self.manager.remove_peer(peer);
    }

    /// Absorb a headers batch: index what connects, then let the manager
    /// track what the peer has. Headers past the first disconnected one
    /// are dropped and the error reported; what already connected still
    /// counts.
    fn on_headers(&self, peer: PeerId, headers: Vec<HeaderAnnounce>) -> SyncResult<()> {
        if headers.is_empty() {
            return Ok(());
        }
        if headers.len() > MAX_HEADERS_PER_MSG {
            warn!(peer = %peer, count = headers.len(), "oversized headers batch ignored");
            return Ok(());
        }
        let mut last: Option<BlockHandle> = None;
        let mut rejected = None;
        {
            let mut chain = self.chain.write();
            for header in &headers {
                match chain.accept_header(header.hash, Some(header.parent), header.work, header.time)
                {
                    Ok(handle) => last = Some(handle),
                    Err(ChainError::DuplicateBlock(_)) => last = chain.lookup(&header.hash),
                    Err(err) => {
                        rejected = Some(err);
                        break;
                    }
                }
            }
        }
        if let Some(last) = last {
            let last_hash = self.chain.read().index.entry(last).hash;
            self.manager.update_block_availability(peer, last_hash);
            self.manager.set_peer_first_header_received(peer, last);
            // More headers may follow; give the stall clock a fresh start.
            self.manager.set_peer_sync_start_time(peer);
        }
        match rejected {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn on_block_inv(&self, peer: PeerId, hashes: Vec<BlockHash>) {
        if hashes.len() > MAX_INV_PER_MSG {
            warn!(peer = %peer, count = hashes.len(), "oversized inv ignored");
            return;
        }
        for hash in hashes {
            self.manager.update_block_availability(peer, hash);
        }
    }

    fn on_block(&self, peer: PeerId, hash: BlockHash) {
        let requested = self.manager.mark_block_received(&hash);
        debug!(peer = %peer, hash = %hash, requested, "block received");
        // Validation and acceptance happen downstream.
    }

    /// One pass of the sync scheduler.
    fn on_tick(&self) {
        let now = self.clock.unix_now();
        for info in self.directory.connected() {
            if info.disconnecting {
                continue;
            }
            self.manager.start_download(&info);

            if let Some(stats) = self.manager.node_state_stats(info.id) {
                if stats.sync_started && stats.sync_start_time == 0 {
                    self.manager.set_peer_sync_start_time(info.id);
                } else if stats.sync_started
                    && !stats.first_headers_received
                    && now - stats.sync_start_time > self.config.sync.stall_timeout_secs
                {
                    warn!(peer = %info.id, "peer stalled before sending initial headers, dropping");
                    self.directory.mark_disconnecting(info.id);
                    self.manager.remove_peer(info.id);
                    continue;
                }
            }

            self.manager.request_next_blocks_to_download(&info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> (Node, mpsc::UnboundedReceiver<(PeerId, Message)>) {
        let (node, _events, outbound) = Node::new(NodeConfig::default_for_network("mainnet"));
        (node, outbound)
    }

    fn peer_info(id: u64) -> PeerInfo {
        PeerInfo::new(PeerId(id), "127.0.0.1:9333".parse().unwrap())
    }

    fn headers_from_genesis(node: &Node, count: u32) -> Vec<HeaderAnnounce> {
        let (genesis, _) = genesis_for("mainnet");
        let mut parent = genesis;
        let mut out = Vec::new();
        for i in 0..count {
            let mut raw = [0u8; 32];
            raw[..4].copy_from_slice(&i.to_le_bytes());
            raw[31] = 0x77;
            let hash = BlockHash(raw);
            out.push(HeaderAnnounce {
                hash,
                parent,
                work: 1,
                time: node.clock.unix_now(),
            });
            parent = hash;
        }
        out
    }

    #[test]
    fn test_connect_registers_and_prefers() {
        let (node, _outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });

        assert!(node.manager.node_state_stats(PeerId(1)).is_some());
        assert_eq!(node.directory.len(), 1);
    }

    #[test]
    fn test_disconnect_cleans_up() {
        let (node, _outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });
        node.handle_event(PeerEvent::Disconnected { peer: PeerId(1) });

        assert!(node.manager.node_state_stats(PeerId(1)).is_none());
        assert!(node.directory.is_empty());
    }

    #[test]
    fn test_headers_update_availability() {
        let (node, _outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });

        let headers = headers_from_genesis(&node, 5);
        node.handle_event(PeerEvent::Headers {
            peer: PeerId(1),
            headers,
        });

        let stats = node.manager.node_state_stats(PeerId(1)).unwrap();
        assert_eq!(stats.sync_height, 5);
        assert!(stats.first_headers_received);
    }

    #[test]
    fn test_tick_requests_blocks_from_synced_peer() {
        let (node, mut outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });
        node.handle_event(PeerEvent::Headers {
            peer: PeerId(1),
            headers: headers_from_genesis(&node, 10),
        });

        node.on_tick();

        let mut saw_getdata = false;
        while let Ok((peer, message)) = outbound.try_recv() {
            assert_eq!(peer, PeerId(1));
            if let Message::GetData(inv) = message {
                assert_eq!(inv.len(), 10);
                saw_getdata = true;
            }
        }
        assert!(saw_getdata);
        assert_eq!(node.manager.blocks_in_flight(PeerId(1)), 10);
    }

    #[test]
    fn test_block_receipt_clears_in_flight() {
        let (node, _outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });
        node.handle_event(PeerEvent::Headers {
            peer: PeerId(1),
            headers: headers_from_genesis(&node, 3),
        });
        node.on_tick();
        assert_eq!(node.manager.blocks_in_flight(PeerId(1)), 3);

        let first = headers_from_genesis(&node, 1)[0].hash;
        node.handle_event(PeerEvent::Block {
            peer: PeerId(1),
            hash: first,
        });
        assert_eq!(node.manager.blocks_in_flight(PeerId(1)), 2);
    }

    #[test]
    fn test_sendheaders_marks_preference() {
        let (node, _outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });

        assert!(!node.manager.prefer_headers(PeerId(1)));
        node.handle_event(PeerEvent::SendHeaders { peer: PeerId(1) });
        assert!(node.manager.prefer_headers(PeerId(1)));
    }

    #[test]
    fn test_tx_relay_roundtrip() {
        let (node, mut outbound) = test_node();
        node.handle_event(PeerEvent::Connected {
            info: peer_info(1),
        });
        let txid = TxId([9; 32]);
        node.handle_event(PeerEvent::TxAccepted {
            txid,
            raw: vec![0xAB],
        });
        node.handle_event(PeerEvent::GetDataTx {
            peer: PeerId(1),
            txid,
        });

        let mut saw_tx = false;
        while let Ok((_, message)) = outbound.try_recv() {
            if matches!(message, Message::Tx(ref raw) if raw == &[0xAB]) {
                saw_tx = true;
            }
        }
        assert!(saw_tx);
    }
}
