//! Active chain and shared chain state.

use crate::error::{ChainError, ChainResult};
use crate::index::{BlockHandle, BlockHash, BlockIndex};
use crate::LOCATOR_DENSE_SPAN;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

/// The most-work fully-linked chain, indexed by height.
#[derive(Default)]
pub struct ActiveChain {
    handles: Vec<BlockHandle>,
}

impl ActiveChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tip entry, or `None` before genesis is connected.
    pub fn tip(&self) -> Option<BlockHandle> {
        self.handles.last().copied()
    }

    /// Height of the tip. Only meaningful once the chain is non-empty.
    pub fn height(&self) -> u32 {
        self.handles.len().saturating_sub(1) as u32
    }

    /// Entry at `height`, or `None` past the tip.
    pub fn at(&self, height: u32) -> Option<BlockHandle> {
        self.handles.get(height as usize).copied()
    }

    /// Whether `handle` lies on this chain.
    pub fn contains(&self, index: &BlockIndex, handle: BlockHandle) -> bool {
        self.at(index.entry(handle).height) == Some(handle)
    }

    /// Replace the chain so that it ends at `tip`, walking `prev` links back.
    pub fn set_tip(&mut self, index: &BlockIndex, tip: BlockHandle) {
        let height = index.entry(tip).height;
        self.handles.resize(height as usize + 1, tip);
        let mut walk = Some(tip);
        let mut at = height as usize;
        while let Some(handle) = walk {
            if self.handles[at] == handle && at != height as usize {
                // The rest of the vector is already correct.
                break;
            }
            self.handles[at] = handle;
            walk = index.entry(handle).prev;
            at = at.wrapping_sub(1);
        }
    }
}

/// Chain data behind the [`ChainState`] lock.
#[derive(Default)]
pub struct ChainInner {
    /// All known headers.
    pub index: BlockIndex,
    /// The most-work fully-linked chain.
    pub active: ActiveChain,
    best_header: Option<BlockHandle>,
}

impl ChainInner {
    /// Shorthand for `self.index.lookup`.
    pub fn lookup(&self, hash: &BlockHash) -> Option<BlockHandle> {
        self.index.lookup(hash)
    }

    /// Deepest known header by chain work, independent of block data.
    pub fn best_header(&self) -> Option<BlockHandle> {
        self.best_header
    }

    /// Height of the active tip (0 when only genesis is connected).
    pub fn tip_height(&self) -> u32 {
        self.active.height()
    }

    /// Accept a new header into the index and track the best header.
    pub fn accept_header(
        &mut self,
        hash: BlockHash,
        parent: Option<BlockHash>,
        work: u128,
        time: i64,
    ) -> ChainResult<BlockHandle> {
        let handle = self.index.insert(hash, parent, work, time)?;
        let work = self.index.entry(handle).chain_work;
        let improves = match self.best_header {
            Some(best) => work > self.index.entry(best).chain_work,
            None => true,
        };
        if improves {
            self.best_header = Some(handle);
            debug!(
                hash = %hash,
                height = self.index.entry(handle).height,
                "new best header"
            );
        }
        Ok(handle)
    }

    /// Extend the active chain by one block that must connect to the tip.
    pub fn connect_tip(&mut self, handle: BlockHandle) -> ChainResult<()> {
        let entry = self.index.entry(handle);
        if entry.prev != self.active.tip() {
            return Err(ChainError::DoesNotConnect(entry.hash));
        }
        self.active.set_tip(&self.index, handle);
        info!(hash = %entry.hash, height = entry.height, "tip advanced");
        Ok(())
    }

    /// Point the active chain at an arbitrary connected tip (reorg path).
    pub fn set_tip(&mut self, handle: BlockHandle) {
        self.active.set_tip(&self.index, handle);
        let entry = self.index.entry(handle);
        info!(hash = %entry.hash, height = entry.height, "tip reset");
    }

    /// Exponentially spaced locator hashes starting at `from`, deepest first.
    pub fn locator(&self, from: BlockHandle) -> Vec<BlockHash> {
        let mut hashes = Vec::with_capacity(32);
        let mut step = 1u32;
        let mut walk = Some(from);
        while let Some(handle) = walk {
            let entry = self.index.entry(handle);
            hashes.push(entry.hash);
            if entry.height == 0 {
                break;
            }
            if hashes.len() >= LOCATOR_DENSE_SPAN {
                step = step.saturating_mul(2);
            }
            let target = entry.height.saturating_sub(step);
            // Stay on the chain `from` belongs to, not the active chain.
            walk = self.index.ancestor_of(handle, target);
        }
        hashes
    }
}

/// Shared chain state.
///
/// The read/write guards double as the lock-order capability: code that
/// needs both this lock and the request-manager lock takes this one first
/// and passes the guard down by reference.
#[derive(Default)]
pub struct ChainState {
    inner: RwLock<ChainInner>,
}

/// Read guard over [`ChainInner`].
pub struct ChainRead<'a>(RwLockReadGuard<'a, ChainInner>);

/// Write guard over [`ChainInner`].
pub struct ChainWrite<'a>(RwLockWriteGuard<'a, ChainInner>);

impl ChainState {
    /// Create an empty chain state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain state holding a connected genesis block.
    pub fn with_genesis(hash: BlockHash, work: u128, time: i64) -> Self {
        let state = Self::new();
        {
            let mut chain = state.write();
            let genesis = chain
                .accept_header(hash, None, work, time)
                .expect("empty index accepts genesis");
            chain.index.mark_block_stored(genesis, 1);
            chain.connect_tip(genesis).expect("genesis connects");
        }
        state
    }

    /// Acquire the chain lock for reading.
    pub fn read(&self) -> ChainRead<'_> {
        ChainRead(self.inner.read())
    }

    /// Acquire the chain lock for writing.
    pub fn write(&self) -> ChainWrite<'_> {
        ChainWrite(self.inner.write())
    }
}

impl Deref for ChainRead<'_> {
    type Target = ChainInner;

    fn deref(&self) -> &ChainInner {
        &self.0
    }
}

impl Deref for ChainWrite<'_> {
    type Target = ChainInner;

    fn deref(&self) -> &ChainInner {
        &self.0
    }
}

impl DerefMut for ChainWrite<'_> {
    fn deref_mut(&mut self) -> &mut ChainInner {
        &mut self.0
    }
}
