//! # basalt-net
//!
//! Peer identity and the wire seam for the Basalt node.
//!
//! This crate provides:
//! - Peer identifiers and per-connection flags
//! - The message vocabulary spoken between the sync layer and peers
//! - The [`PeerLink`] capability trait with a channel-backed implementation
//!   and a recording double for tests
//!
//! Framing, handshake, and transport live outside this crate; the sync
//! layer only ever sees [`PeerId`]s and [`Message`]s.

mod error;
mod link;
mod message;
mod peer;

pub use error::{NetError, NetResult};
pub use link::{ChannelLink, PeerLink, RecordingLink};
pub use message::{Inv, Locator, Message, TxId};
pub use peer::{PeerDirectory, PeerId, PeerInfo};

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 9333;

/// Maximum number of headers a peer may send in one `headers` message.
pub const MAX_HEADERS_PER_MSG: usize = 2000;

/// Maximum number of inventory entries in one `getdata` message.
pub const MAX_INV_PER_MSG: usize = 50_000;
