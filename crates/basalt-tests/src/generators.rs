//! Proptest strategies for sync tests.

use basalt_chain::BlockHash;
use proptest::prelude::*;

/// Arbitrary 32-byte block hashes.
pub fn arb_hash() -> impl Strategy<Value = BlockHash> {
    prop::array::uniform32(any::<u8>()).prop_map(BlockHash)
}

/// Hash drawn from a small pool, so op sequences collide on purpose.
pub fn arb_pool_hash(pool: u8) -> impl Strategy<Value = BlockHash> {
    (0..pool).prop_map(|n| BlockHash([n; 32]))
}

/// One operation against the in-flight ledger.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Mark a hash in flight to a peer.
    Mark { peer: u64, hash: BlockHash },
    /// Mark a hash received.
    Receive { hash: BlockHash },
    /// Disconnect a peer and reconnect it fresh.
    Churn { peer: u64 },
}

/// Sequences of ledger operations over `peers` peers and a small hash pool.
pub fn arb_ledger_ops(peers: u64, max_len: usize) -> impl Strategy<Value = Vec<LedgerOp>> {
    let op = prop_oneof![
        (0..peers, arb_pool_hash(24)).prop_map(|(peer, hash)| LedgerOp::Mark { peer, hash }),
        arb_pool_hash(24).prop_map(|hash| LedgerOp::Receive { hash }),
        (0..peers).prop_map(|peer| LedgerOp::Churn { peer }),
    ];
    prop::collection::vec(op, 1..max_len)
}

/// Parent links for a random block tree: node `i` (1-based, genesis is 0)
/// gets `links[i - 1]` resolved against the nodes before it.
pub fn arb_parent_links(max_nodes: usize) -> impl Strategy<Value = Vec<prop::sample::Index>> {
    prop::collection::vec(any::<prop::sample::Index>(), 1..max_nodes)
}
