//! Test harness for integration tests.
//!
//! Builds chain states of arbitrary shape and bundles a request manager
//! with its recording link, manual clock, and shared flags.

use basalt_chain::{BlockHandle, BlockHash, ChainState};
use basalt_net::{PeerId, PeerInfo, RecordingLink};
use basalt_sync::{BlockHave, ManualClock, NodeFlags, RequestManager};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Deterministic hash for a main-chain block at `height`.
pub fn main_hash(height: u32) -> BlockHash {
    let mut raw = [0u8; 32];
    raw[..4].copy_from_slice(&height.to_le_bytes());
    raw[31] = 0x4D;
    BlockHash(raw)
}

/// Deterministic hash for a side-chain block, distinguished by `salt`.
pub fn side_hash(salt: u8, seq: u32) -> BlockHash {
    let mut raw = [0u8; 32];
    raw[..4].copy_from_slice(&seq.to_le_bytes());
    raw[30] = salt;
    raw[31] = 0x5E;
    BlockHash(raw)
}

/// `BlockHave` double backed by a hash set.
#[derive(Default)]
pub struct TestHave {
    hashes: RwLock<HashSet<BlockHash>>,
}

impl TestHave {
    /// Pretend the node already has `hash`.
    pub fn insert(&self, hash: BlockHash) {
        self.hashes.write().insert(hash);
    }
}

impl BlockHave for TestHave {
    fn already_have_block(&self, hash: &BlockHash) -> bool {
        self.hashes.read().contains(hash)
    }
}

/// A request manager wired to doubles, over a configurable chain.
pub struct SyncFixture {
    /// The shared chain state.
    pub chain: Arc<ChainState>,
    /// Records every outbound message.
    pub link: Arc<RecordingLink>,
    /// Hand-driven clock.
    pub clock: Arc<ManualClock>,
    /// Process-wide flags.
    pub flags: Arc<NodeFlags>,
    /// The already-have double.
    pub have: Arc<TestHave>,
    /// The manager under test.
    pub manager: RequestManager,
}

impl SyncFixture {
    /// Fixture over a connected, fully stored local chain of `len` blocks
    /// (genesis included), block times 600 s apart from zero.
    pub fn with_local_chain(len: u32) -> Self {
        assert!(len >= 1, "chain needs at least genesis");
        let chain = Arc::new(ChainState::with_genesis(main_hash(0), 1, 0));
        {
            let mut view = chain.write();
            for height in 1..len {
                let handle = view
                    .accept_header(
                        main_hash(height),
                        Some(main_hash(height - 1)),
                        1,
                        i64::from(height) * 600,
                    )
                    .expect("linear chain connects");
                view.index.mark_block_stored(handle, 1);
                view.connect_tip(handle).expect("extends the tip");
            }
        }
        let link = Arc::new(RecordingLink::new());
        let clock = Arc::new(ManualClock::new(0));
        let flags = Arc::new(NodeFlags::new());
        let have = Arc::new(TestHave::default());
        let manager = RequestManager::new(
            chain.clone(),
            link.clone(),
            have.clone(),
            clock.clone(),
            flags.clone(),
        );
        Self {
            chain,
            link,
            clock,
            flags,
            have,
            manager,
        }
    }

    /// Register a full peer with the manager and return its info.
    pub fn add_peer(&self, id: u64) -> PeerInfo {
        let info = PeerInfo::new(
            PeerId(id),
            format!("10.0.{}.{}:9333", id / 250, id % 250).parse().unwrap(),
        );
        self.manager
            .initialize_peer(info.id, info.addr, info.addr_name.clone());
        info
    }

    /// Register a peer and mark it preferred-download.
    pub fn add_preferred_peer(&self, id: u64) -> PeerInfo {
        let info = self.add_peer(id);
        self.manager
            .update_preferred_download(info.id, false, false);
        info
    }

    /// Index main-chain headers for heights `from+1..=to` without storing
    /// their blocks. Returns the handle of the deepest one.
    pub fn extend_main_headers(&self, from: u32, to: u32) -> BlockHandle {
        let mut view = self.chain.write();
        let mut last = view
            .lookup(&main_hash(from))
            .expect("extension point exists");
        for height in from + 1..=to {
            last = view
                .accept_header(main_hash(height), Some(main_hash(height - 1)), 1, 0)
                .expect("headers connect");
        }
        last
    }

    /// Index a side branch of `len` headers forking off the main chain at
    /// `fork_height`, `work` each. Returns the branch tip.
    pub fn fork_headers(&self, fork_height: u32, len: u32, salt: u8, work: u128) -> BlockHandle {
        let mut view = self.chain.write();
        let mut parent = main_hash(fork_height);
        let mut last = view.lookup(&parent).expect("fork point exists");
        for seq in 0..len {
            let hash = side_hash(salt, seq);
            last = view
                .accept_header(hash, Some(parent), work, 0)
                .expect("branch connects");
            parent = hash;
        }
        last
    }

    /// Mark a block's data as stored.
    pub fn store_block(&self, handle: BlockHandle) {
        self.chain.write().index.mark_block_stored(handle, 1);
    }

    /// Tell the manager that `peer` announced the block at `handle`.
    pub fn announce(&self, peer: PeerId, handle: BlockHandle) {
        let hash = self.chain.read().index.entry(handle).hash;
        self.manager.update_block_availability(peer, hash);
    }

    /// Handle for a hash that must be indexed.
    pub fn handle_of(&self, hash: &BlockHash) -> BlockHandle {
        self.chain.read().lookup(hash).expect("hash is indexed")
    }

    /// Handle of the active-chain block at `height`.
    pub fn at_height(&self, height: u32) -> BlockHandle {
        self.chain
            .read()
            .active
            .at(height)
            .expect("height within the active chain")
    }

    /// Height of an index entry.
    pub fn height_of(&self, handle: BlockHandle) -> u32 {
        self.chain.read().index.entry(handle).height
    }

    /// Heights of a download pick list, in order.
    pub fn heights(&self, handles: &[BlockHandle]) -> Vec<u32> {
        let chain = self.chain.read();
        handles
            .iter()
            .map(|&h| chain.index.entry(h).height)
            .collect()
    }
}
