//! # basalt-chain
//!
//! Block index and active chain for the Basalt node.
//!
//! This crate provides:
//! - An append-only block-index arena addressed by stable handles
//! - Skip-list ancestor lookup and last-common-ancestor queries
//! - The active (most-work) chain with locator construction
//! - A shared, lock-guarded chain state consumed by the sync layer

mod chain;
mod error;
mod index;

pub use chain::{ActiveChain, ChainInner, ChainRead, ChainState, ChainWrite};
pub use error::{ChainError, ChainResult};
pub use index::{BlockEntry, BlockHandle, BlockHash, BlockIndex, Validity};

/// Height of the genesis block.
pub const GENESIS_HEIGHT: u32 = 0;

/// Number of locator entries emitted before the step starts doubling.
pub const LOCATOR_DENSE_SPAN: usize = 10;
