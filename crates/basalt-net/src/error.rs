//! Network error types.

use crate::peer::PeerId;
use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetError {
    /// The peer's outbound queue is gone.
    #[error("Peer {0} is no longer connected")]
    PeerGone(PeerId),

    /// The transport behind the link has shut down.
    #[error("Link channel closed")]
    ChannelClosed,
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;
