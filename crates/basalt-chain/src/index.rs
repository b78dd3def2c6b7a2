//! Append-only block index.
//!
//! Every known header gets one arena entry, addressed by a stable
//! [`BlockHandle`]. Entries carry `prev` and `skip` links so ancestor
//! lookups cost O(log height) rather than one pointer chase per block.

use crate::error::{ChainError, ChainResult};
use std::collections::HashMap;
use std::fmt;

/// 32-byte block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The all-zero hash, used as the open-ended `getheaders` stop hash.
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", hex::encode(self.0))
    }
}

/// Stable index of an entry in the block-index arena.
///
/// Handles stay valid for the life of the index; entries are never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub u32);

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How far a block has been validated.
///
/// Ordered: each level implies all previous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Validity {
    /// Nothing beyond deserialization checked yet.
    Unknown,
    /// Header connects to the tree and passed header checks.
    Tree,
    /// Block transactions validated.
    Transactions,
    /// Fully connected to the chain state.
    Chain,
}

/// One record in the block index.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// Block identifier.
    pub hash: BlockHash,
    /// Parent entry; `None` only for genesis.
    pub prev: Option<BlockHandle>,
    /// Skip-list link used by `get_ancestor`.
    pub skip: Option<BlockHandle>,
    /// Distance from genesis.
    pub height: u32,
    /// Cumulative proof-of-work up to and including this block.
    pub chain_work: u128,
    /// Block timestamp (unix seconds), as claimed by the header.
    pub time: i64,
    /// Whether the full block data is stored locally.
    pub has_data: bool,
    /// Cumulative transaction count; non-zero only once this block and
    /// all its ancestors have data.
    pub chain_tx: u64,
    /// Validation progress.
    pub validity: Validity,
}

impl BlockEntry {
    /// Whether this entry has been validated to at least `level`.
    pub fn is_valid(&self, level: Validity) -> bool {
        self.validity >= level
    }
}

/// Turn off the lowest set bit.
fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}

/// Height of the skip-link target for a block at `height`.
fn skip_height(height: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// Append-only arena of block entries with hash lookup.
#[derive(Default)]
pub struct BlockIndex {
    entries: Vec<BlockEntry>,
    by_hash: HashMap<BlockHash, BlockHandle>,
}

impl BlockIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a handle.
    ///
    /// Handles are only minted by this index, so an out-of-range handle is
    /// a programming error and aborts.
    pub fn entry(&self, handle: BlockHandle) -> &BlockEntry {
        &self.entries[handle.0 as usize]
    }

    fn entry_mut(&mut self, handle: BlockHandle) -> &mut BlockEntry {
        &mut self.entries[handle.0 as usize]
    }

    /// Look a header up by hash.
    pub fn lookup(&self, hash: &BlockHash) -> Option<BlockHandle> {
        self.by_hash.get(hash).copied()
    }

    /// Insert a header whose parent (if any) is already indexed.
    ///
    /// `work` is the proof-of-work of this single block; the entry stores
    /// the cumulative chain work. The entry starts at [`Validity::Tree`]:
    /// callers only insert headers that passed header-level checks.
    pub fn insert(
        &mut self,
        hash: BlockHash,
        parent: Option<BlockHash>,
        work: u128,
        time: i64,
    ) -> ChainResult<BlockHandle> {
        if self.by_hash.contains_key(&hash) {
            return Err(ChainError::DuplicateBlock(hash));
        }
        let (prev, height, parent_work) = match parent {
            Some(parent_hash) => {
                let prev = self.lookup(&parent_hash).ok_or(ChainError::UnknownParent {
                    hash,
                    parent: parent_hash,
                })?;
                let parent_entry = self.entry(prev);
                (Some(prev), parent_entry.height + 1, parent_entry.chain_work)
            }
            None => {
                if !self.entries.is_empty() {
                    return Err(ChainError::GenesisAlreadySet(hash));
                }
                (None, 0, 0)
            }
        };

        let skip = if height >= 1 {
            // prev is Some whenever height >= 1.
            self.ancestor_of(prev.unwrap(), skip_height(height))
        } else {
            None
        };

        let handle = BlockHandle(self.entries.len() as u32);
        self.entries.push(BlockEntry {
            hash,
            prev,
            skip,
            height,
            chain_work: parent_work + work,
            time,
            has_data: false,
            chain_tx: 0,
            validity: Validity::Tree,
        });
        self.by_hash.insert(hash, handle);
        Ok(handle)
    }

    /// Ancestor of `from` at `height`, or `None` if `height` is above `from`.
    pub fn ancestor_of(&self, from: BlockHandle, height: u32) -> Option<BlockHandle> {
        let mut walk = from;
        let mut walk_height = self.entry(walk).height;
        if height > walk_height {
            return None;
        }
        while walk_height > height {
            let entry = self.entry(walk);
            let height_skip = skip_height(walk_height);
            let height_skip_prev = skip_height(walk_height - 1);
            let take_skip = entry.skip.is_some()
                && (height_skip == height
                    || (height_skip > height
                        && !(height_skip_prev < height_skip.saturating_sub(2)
                            && height_skip_prev >= height)));
            if take_skip {
                walk = entry.skip.unwrap();
                walk_height = height_skip;
            } else {
                walk = entry.prev.expect("non-genesis entry has a parent");
                walk_height -= 1;
            }
        }
        Some(walk)
    }

    /// Deepest entry on both `a`'s and `b`'s chains.
    ///
    /// Both inputs must descend from the same genesis, which holds for any
    /// two handles minted by one index.
    pub fn last_common_ancestor(&self, a: BlockHandle, b: BlockHandle) -> BlockHandle {
        let mut a = a;
        let mut b = b;
        let height_a = self.entry(a).height;
        let height_b = self.entry(b).height;
        if height_a > height_b {
            a = self
                .ancestor_of(a, height_b)
                .expect("lowering to a smaller height cannot fail");
        } else if height_b > height_a {
            b = self
                .ancestor_of(b, height_a)
                .expect("lowering to a smaller height cannot fail");
        }
        while a != b {
            a = self.entry(a).prev.expect("chains meet at genesis");
            b = self.entry(b).prev.expect("chains meet at genesis");
        }
        a
    }

    /// Record that the full block data for `handle` has been stored.
    ///
    /// Sets `chain_tx` when every ancestor already has it, which is the
    /// normal case since blocks are fetched in ascending height order.
    pub fn mark_block_stored(&mut self, handle: BlockHandle, tx_count: u64) {
        let parent_chain_tx = match self.entry(handle).prev {
            Some(prev) => self.entry(prev).chain_tx,
            None => 0,
        };
        let connected = self.entry(handle).prev.is_none() || parent_chain_tx > 0;
        let entry = self.entry_mut(handle);
        entry.has_data = true;
        if connected && entry.chain_tx == 0 {
            entry.chain_tx = parent_chain_tx + tx_count;
        }
    }

    /// Lower an entry's validity to mark it (and implicitly its descendants)
    /// as failing validation.
    pub fn set_validity(&mut self, handle: BlockHandle, validity: Validity) {
        self.entry_mut(handle).validity = validity;
    }
}
