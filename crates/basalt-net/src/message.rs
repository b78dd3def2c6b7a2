//! Message vocabulary between the sync layer and peers.

use basalt_chain::BlockHash;
use std::fmt;

/// 32-byte transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", hex::encode(self.0))
    }
}

/// One inventory entry, as carried by `inv` and `getdata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inv {
    /// A full block.
    Block(BlockHash),
    /// A transaction.
    Tx(TxId),
}

/// Block locator: exponentially spaced hashes, deepest-first, ending at
/// genesis. Conveys the requester's position to a `getheaders` responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator(pub Vec<BlockHash>);

impl Locator {
    /// Wrap a list of locator hashes.
    pub fn new(hashes: Vec<BlockHash>) -> Self {
        Self(hashes)
    }

    /// The hashes, deepest first.
    pub fn hashes(&self) -> &[BlockHash] {
        &self.0
    }
}

/// Outbound protocol messages produced by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask a peer for headers after the locator position.
    GetHeaders {
        /// Our position, deepest first.
        locator: Locator,
        /// Stop hash; [`BlockHash::ZERO`] for "as many as allowed".
        stop: BlockHash,
    },
    /// Ask a peer for the listed inventory.
    GetData(Vec<Inv>),
    /// Serialized transaction bytes, answering `getdata`.
    Tx(Vec<u8>),
}
