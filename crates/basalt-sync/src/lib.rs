//! # basalt-sync
//!
//! The block request manager: decides, per connected peer, which headers
//! and blocks to ask for next so the local chain catches up to the
//! best-work chain on the network.
//!
//! This crate provides:
//! - Per-peer sync state and block-availability tracking
//! - The process-wide in-flight ledger with per-peer counters
//! - Download scheduling over the block-index DAG (common-ancestor repair,
//!   download-window throttling, per-peer in-flight caps)
//! - Sync-start gating and first-headers policy
//! - A short-TTL transaction relay cache answering `getdata` re-requests

mod clock;
mod error;
mod inflight;
mod manager;
mod peer;
mod relay;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SyncError, SyncResult};
pub use inflight::InFlightLedger;
pub use manager::{BlockHave, NodeFlags, RequestManager};
pub use peer::{PeerStats, PeerSyncState};
pub use relay::RelayCache;

/// Hard cap on blocks requested from a single peer at once.
pub const MAX_BLOCKS_IN_FLIGHT_PER_PEER: usize = 64;

/// How far ahead of the active tip undownloaded blocks may be queued.
/// Bounds disk pressure when running pruned.
pub const BLOCK_DOWNLOAD_WINDOW: u32 = 1024;

/// Minimum successors materialized per ancestor jump in the download walk.
/// One `ancestor_of` costs about as much as a hundred `prev` steps, so
/// smaller batches would be dominated by the jump itself.
pub const ANCESTOR_WALK_BATCH: u32 = 128;

/// How long a relayed transaction stays answerable, in seconds.
pub const RELAY_EXPIRY_SECS: i64 = 15 * 60;

/// Best-header age under which we sync even from non-preferred peers.
pub const STALE_HEADER_AGE_SECS: i64 = 24 * 60 * 60;
