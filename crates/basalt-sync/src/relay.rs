//! Short-TTL transaction relay cache.
//!
//! Recently relayed transactions are kept answerable for fifteen minutes
//! so peers that missed the original announcement can still `getdata` it.

use crate::RELAY_EXPIRY_SECS;
use basalt_net::TxId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

struct RelayInner {
    by_txid: HashMap<TxId, Arc<Vec<u8>>>,
    /// `(deadline, txid)` in insertion order; the front expires first.
    expiry: VecDeque<(i64, TxId)>,
}

/// Map from transaction id to raw bytes with ordered expiry.
pub struct RelayCache {
    inner: Mutex<RelayInner>,
}

impl Default for RelayCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelayInner {
                by_txid: HashMap::new(),
                expiry: VecDeque::new(),
            }),
        }
    }

    /// Remember `raw` under `txid` for the relay TTL, evicting entries
    /// whose deadline has passed.
    pub fn track(&self, txid: TxId, raw: Vec<u8>, now: i64) {
        let mut inner = self.inner.lock();
        while let Some(&(deadline, front)) = inner.expiry.front() {
            if deadline >= now {
                break;
            }
            inner.by_txid.remove(&front);
            inner.expiry.pop_front();
            trace!(txid = %front, "relay entry expired");
        }
        if !inner.by_txid.contains_key(&txid) {
            inner.by_txid.insert(txid, Arc::new(raw));
            inner.expiry.push_back((now + RELAY_EXPIRY_SECS, txid));
        }
    }

    /// The raw bytes for `txid`, if still cached.
    pub fn find(&self, txid: &TxId) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().by_txid.get(txid).cloned()
    }

    /// Number of cached transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().by_txid.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_txid.is_empty()
    }
}
