//! Process-wide in-flight block ledger.

use basalt_chain::{BlockHandle, BlockHash};
use basalt_net::PeerId;
use std::collections::HashMap;

/// One requested-but-unreceived block.
#[derive(Debug, Clone, Copy)]
struct QueuedBlock {
    /// Index entry, when the header was known at request time.
    index: Option<BlockHandle>,
}

/// Global map from block hash to the single peer it is in flight to, plus
/// a per-peer counter kept exactly consistent with the map.
///
/// Not internally locked: lives under the request-manager lock next to the
/// peer map, so a reader always sees counter and map agree.
#[derive(Default)]
pub struct InFlightLedger {
    by_hash: HashMap<BlockHash, (PeerId, QueuedBlock)>,
    counts: HashMap<PeerId, usize>,
}

impl InFlightLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a peer with a zero counter.
    pub fn init_peer(&mut self, peer: PeerId) {
        self.counts.entry(peer).or_insert(0);
    }

    /// Stop tracking a peer: drop its counter and release every entry it
    /// owns. Returns the released hashes.
    pub fn drop_peer(&mut self, peer: PeerId) -> Vec<BlockHash> {
        self.counts.remove(&peer);
        let released: Vec<BlockHash> = self
            .by_hash
            .iter()
            .filter(|(_, (owner, _))| *owner == peer)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &released {
            self.by_hash.remove(hash);
        }
        released
    }

    /// Record `hash` as in flight to `peer`.
    ///
    /// A hash is owned by at most one peer: any previous owner's entry is
    /// released first.
    pub fn mark_in_flight(&mut self, peer: PeerId, hash: BlockHash, index: Option<BlockHandle>) {
        self.mark_received(&hash);
        self.by_hash.insert(hash, (peer, QueuedBlock { index }));
        *self.counts.entry(peer).or_insert(0) += 1;
    }

    /// Release `hash` from the ledger. Returns whether it was in flight.
    pub fn mark_received(&mut self, hash: &BlockHash) -> bool {
        match self.by_hash.remove(hash) {
            Some((owner, _)) => {
                if let Some(count) = self.counts.get_mut(&owner) {
                    *count = count.saturating_sub(1);
                }
                true
            }
            None => false,
        }
    }

    /// Whether `hash` is in flight to any peer.
    pub fn is_in_flight(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Number of blocks in flight to `peer`.
    pub fn count(&self, peer: PeerId) -> usize {
        self.counts.get(&peer).copied().unwrap_or(0)
    }

    /// Number of blocks in flight overall.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Index entries of blocks in flight to `peer`, for entries whose
    /// header was known at request time.
    pub fn entries_for(&self, peer: PeerId) -> Vec<BlockHandle> {
        self.by_hash
            .values()
            .filter(|(owner, _)| *owner == peer)
            .filter_map(|(_, queued)| queued.index)
            .collect()
    }

    /// Number of ledger entries owned by `peer` (map side, not the counter).
    pub fn entries_owned_by(&self, peer: PeerId) -> usize {
        self.by_hash
            .values()
            .filter(|(owner, _)| *owner == peer)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash([n; 32])
    }

    #[test]
    fn test_mark_and_receive() {
        let mut ledger = InFlightLedger::new();
        let peer = PeerId(1);
        ledger.init_peer(peer);

        ledger.mark_in_flight(peer, hash(1), None);
        assert!(ledger.is_in_flight(&hash(1)));
        assert_eq!(ledger.count(peer), 1);
        assert_eq!(ledger.len(), 1);

        assert!(ledger.mark_received(&hash(1)));
        assert!(!ledger.is_in_flight(&hash(1)));
        assert_eq!(ledger.count(peer), 0);
        assert!(ledger.is_empty());

        // Second receive is a no-op.
        assert!(!ledger.mark_received(&hash(1)));
        assert_eq!(ledger.count(peer), 0);
    }

    #[test]
    fn test_single_owner_per_hash() {
        let mut ledger = InFlightLedger::new();
        ledger.init_peer(PeerId(1));
        ledger.init_peer(PeerId(2));

        ledger.mark_in_flight(PeerId(1), hash(9), None);
        ledger.mark_in_flight(PeerId(2), hash(9), None);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.count(PeerId(1)), 0);
        assert_eq!(ledger.count(PeerId(2)), 1);
        assert_eq!(ledger.entries_owned_by(PeerId(1)), 0);
        assert_eq!(ledger.entries_owned_by(PeerId(2)), 1);
    }

    #[test]
    fn test_drop_peer_releases_entries() {
        let mut ledger = InFlightLedger::new();
        ledger.init_peer(PeerId(1));
        ledger.init_peer(PeerId(2));
        ledger.mark_in_flight(PeerId(1), hash(1), None);
        ledger.mark_in_flight(PeerId(1), hash(2), None);
        ledger.mark_in_flight(PeerId(2), hash(3), None);

        let mut released = ledger.drop_peer(PeerId(1));
        released.sort();
        assert_eq!(released, vec![hash(1), hash(2)]);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.count(PeerId(1)), 0);
        assert!(ledger.is_in_flight(&hash(3)));
    }

    #[test]
    fn test_counts_match_entries() {
        let mut ledger = InFlightLedger::new();
        for p in 1..=3u64 {
            ledger.init_peer(PeerId(p));
        }
        for n in 0..30u8 {
            ledger.mark_in_flight(PeerId(u64::from(n % 3) + 1), hash(n), None);
        }

        let total: usize = (1..=3u64).map(|p| ledger.count(PeerId(p))).sum();
        assert_eq!(total, ledger.len());
        for p in 1..=3u64 {
            assert_eq!(ledger.count(PeerId(p)), ledger.entries_owned_by(PeerId(p)));
        }
    }
}
