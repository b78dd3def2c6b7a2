//! Chain error types.

use crate::index::BlockHash;
use thiserror::Error;

/// Chain errors.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Header already present in the index.
    #[error("Duplicate block: {0}")]
    DuplicateBlock(BlockHash),

    /// Header's parent is not in the index.
    #[error("Unknown parent {parent} for block {hash}")]
    UnknownParent { hash: BlockHash, parent: BlockHash },

    /// A second genesis header was offered.
    #[error("Genesis already set, rejecting {0}")]
    GenesisAlreadySet(BlockHash),

    /// Tip candidate does not connect to the current tip.
    #[error("Block {0} does not extend the active tip")]
    DoesNotConnect(BlockHash),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
