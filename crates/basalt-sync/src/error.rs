//! Sync error types.

use thiserror::Error;

/// Sync errors surfaced to the node shell.
///
/// The request manager itself reports absence through `bool`/`Option`
/// returns (and aborts on registry misuse); these variants exist for the
/// seams where the node needs a proper error to propagate.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network error from the outbound link.
    #[error("Network error: {0}")]
    Net(#[from] basalt_net::NetError),

    /// Chain error while absorbing headers.
    #[error("Chain error: {0}")]
    Chain(#[from] basalt_chain::ChainError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
