//! Scenario tests for the request manager.
//!
//! Each section drives the public contract the node's message handlers
//! and sync tick use, over purpose-built chain shapes.

use crate::harness::{main_hash, side_hash, SyncFixture};
use basalt_chain::{BlockHash, Validity};
use basalt_net::{Message, PeerId};
use basalt_sync::{BLOCK_DOWNLOAD_WINDOW, MAX_BLOCKS_IN_FLIGHT_PER_PEER};

// ============================================================================
// Preferred-download bookkeeping
// ============================================================================

#[test]
fn test_preferred_download_counts_full_peers_only() {
    let fixture = SyncFixture::with_local_chain(2);
    fixture.add_peer(1);

    fixture
        .manager
        .update_preferred_download(PeerId(1), false, false);
    assert_eq!(fixture.flags.preferred_download_count(), 1);

    // The same peer re-evaluated as a filtered client drops back out.
    fixture
        .manager
        .update_preferred_download(PeerId(1), false, true);
    assert_eq!(fixture.flags.preferred_download_count(), 0);

    // One-shot peers never count.
    fixture
        .manager
        .update_preferred_download(PeerId(1), true, false);
    assert_eq!(fixture.flags.preferred_download_count(), 0);
}

#[test]
fn test_disconnect_returns_preferred_contribution() {
    let fixture = SyncFixture::with_local_chain(2);
    fixture.add_preferred_peer(1);
    fixture.add_preferred_peer(2);
    assert_eq!(fixture.flags.preferred_download_count(), 2);

    fixture.manager.remove_peer(PeerId(1));
    assert_eq!(fixture.flags.preferred_download_count(), 1);
}

// ============================================================================
// Initial getheaders
// ============================================================================

#[test]
fn test_initial_getheaders_starts_one_below_best_header() {
    let fixture = SyncFixture::with_local_chain(101);
    let info = fixture.add_preferred_peer(1);

    fixture.manager.start_download(&info);

    let sent = fixture.link.sent_to(PeerId(1));
    assert_eq!(sent.len(), 1);
    let Message::GetHeaders { locator, stop } = &sent[0] else {
        panic!("expected getheaders, got {:?}", sent[0]);
    };
    // Starting below the best header guarantees a non-empty response from
    // an up-to-date peer, which primes its best known block.
    assert_eq!(locator.hashes()[0], main_hash(99));
    assert_eq!(*stop, BlockHash::ZERO);
    assert!(fixture.manager.node_state_stats(PeerId(1)).unwrap().sync_started);
}

#[test]
fn test_first_headers_bar_is_tip_height_at_sync_start() {
    let fixture = SyncFixture::with_local_chain(101);
    let info = fixture.add_preferred_peer(1);
    fixture.manager.start_download(&info);

    // Height 99 does not clear the bar captured at sync start (100).
    fixture
        .manager
        .set_peer_first_header_received(PeerId(1), fixture.at_height(99));
    assert!(
        !fixture
            .manager
            .node_state_stats(PeerId(1))
            .unwrap()
            .first_headers_received
    );

    fixture
        .manager
        .set_peer_first_header_received(PeerId(1), fixture.at_height(100));
    assert!(
        fixture
            .manager
            .node_state_stats(PeerId(1))
            .unwrap()
            .first_headers_received
    );
}

// ============================================================================
// Download scheduling
// ============================================================================

#[test]
fn test_find_returns_contiguous_blocks_above_tip() {
    let fixture = SyncFixture::with_local_chain(501);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(500, 2000);
    fixture.announce(info.id, peer_tip);

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);

    let expected: Vec<u32> = (501..=564).collect();
    assert_eq!(fixture.heights(&out), expected);
}

#[test]
fn test_find_respects_download_window() {
    let fixture = SyncFixture::with_local_chain(501);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(500, 2000);
    fixture.announce(info.id, peer_tip);

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 1100, &mut out);

    let window_end = 500 + BLOCK_DOWNLOAD_WINDOW;
    assert_eq!(out.len(), BLOCK_DOWNLOAD_WINDOW as usize);
    assert!(fixture.heights(&out).iter().all(|&h| h <= window_end));
    assert_eq!(*fixture.heights(&out).last().unwrap(), window_end);
}

#[test]
fn test_find_skips_blocks_in_flight_to_other_peer() {
    let fixture = SyncFixture::with_local_chain(501);
    let info = fixture.add_preferred_peer(1);
    fixture.add_peer(2);
    let peer_tip = fixture.extend_main_headers(500, 2000);
    fixture.announce(info.id, peer_tip);

    let contested = fixture.handle_of(&main_hash(501));
    fixture
        .manager
        .mark_block_in_flight(PeerId(2), main_hash(501), Some(contested));

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);

    let expected: Vec<u32> = (502..=565).collect();
    assert_eq!(fixture.heights(&out), expected);
}

#[test]
fn test_find_abandons_invalid_chain() {
    let fixture = SyncFixture::with_local_chain(10);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(9, 30);
    fixture.announce(info.id, peer_tip);

    let bad = fixture.handle_of(&main_hash(15));
    fixture.chain.write().index.set_validity(bad, Validity::Unknown);

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);

    // Stops cold at the first entry that fails tree validity.
    assert_eq!(fixture.heights(&out), vec![10, 11, 12, 13, 14]);
}

#[test]
fn test_find_with_nothing_useful_returns_empty() {
    let fixture = SyncFixture::with_local_chain(50);
    let info = fixture.add_preferred_peer(1);

    // No best known block yet.
    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);
    assert!(out.is_empty());

    // Peer at our own tip: common equals best known.
    fixture.announce(info.id, fixture.at_height(49));
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);
    assert!(out.is_empty());

    // A peer behind our tip has nothing we need.
    let laggard = fixture.add_peer(2);
    fixture.announce(laggard.id, fixture.at_height(20));
    fixture
        .manager
        .find_next_blocks_to_download(laggard.id, 64, &mut out);
    assert!(out.is_empty());
}

#[test]
fn test_request_next_fills_and_holds_the_in_flight_cap() {
    let fixture = SyncFixture::with_local_chain(11);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(10, 2010);
    fixture.announce(info.id, peer_tip);

    fixture.manager.request_next_blocks_to_download(&info);
    assert_eq!(
        fixture.manager.blocks_in_flight(PeerId(1)),
        MAX_BLOCKS_IN_FLIGHT_PER_PEER
    );

    // At the cap, another pass sends nothing.
    fixture.manager.request_next_blocks_to_download(&info);
    let getdatas: Vec<_> = fixture
        .link
        .sent_to(PeerId(1))
        .into_iter()
        .filter(|m| matches!(m, Message::GetData(_)))
        .collect();
    assert_eq!(getdatas.len(), 1);

    // Receive and store ten blocks; the next pass tops the pipeline up.
    for height in 11..=20 {
        assert!(fixture.manager.mark_block_received(&main_hash(height)));
        fixture.store_block(fixture.handle_of(&main_hash(height)));
    }
    fixture.manager.request_next_blocks_to_download(&info);
    assert_eq!(
        fixture.manager.blocks_in_flight(PeerId(1)),
        MAX_BLOCKS_IN_FLIGHT_PER_PEER
    );
    let last = fixture.link.sent_to(PeerId(1)).pop().unwrap();
    let Message::GetData(inv) = last else {
        panic!("expected getdata");
    };
    assert_eq!(inv.len(), 10);
}

#[test]
fn test_request_next_filters_blocks_already_stored() {
    let fixture = SyncFixture::with_local_chain(10);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(9, 30);
    fixture.announce(info.id, peer_tip);

    fixture.have.insert(main_hash(10));
    fixture.manager.request_next_blocks_to_download(&info);

    let sent = fixture.link.sent_to(PeerId(1));
    let Message::GetData(inv) = sent.last().unwrap() else {
        panic!("expected getdata");
    };
    assert_eq!(inv.len(), 20);
    assert!(!fixture.manager.is_block_in_flight(&main_hash(10)));
    assert!(fixture.manager.is_block_in_flight(&main_hash(11)));
}

#[test]
fn test_request_next_skips_client_and_disconnecting_peers() {
    let fixture = SyncFixture::with_local_chain(10);
    let mut info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(9, 30);
    fixture.announce(info.id, peer_tip);

    info.client = true;
    fixture.manager.request_next_blocks_to_download(&info);
    info.client = false;
    info.disconnecting = true;
    fixture.manager.request_next_blocks_to_download(&info);

    assert_eq!(fixture.manager.total_blocks_in_flight(), 0);
    assert!(fixture.link.sent_to(PeerId(1)).is_empty());
}

// ============================================================================
// Reorg repair
// ============================================================================

#[test]
fn test_common_block_rewinds_after_peer_reorg() {
    // Local data reaches height 300; a side branch forks at 250.
    let fixture = SyncFixture::with_local_chain(301);
    let info = fixture.add_preferred_peer(1);
    let side_tip = fixture.fork_headers(250, 150, 0xA1, 1);
    fixture.announce(info.id, side_tip);

    // The first ten side blocks are already stored, so the common block
    // advances onto the side branch during enumeration.
    for seq in 0..10 {
        fixture.store_block(fixture.handle_of(&side_hash(0xA1, seq)));
    }
    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);

    let stats = fixture.manager.node_state_stats(PeerId(1)).unwrap();
    assert_eq!(stats.common_height, 260);
    assert_eq!(out[0], fixture.handle_of(&side_hash(0xA1, 10)));

    // The peer reorganizes onto the main chain, which now has more work.
    let main_tip = fixture.extend_main_headers(300, 500);
    fixture.announce(info.id, main_tip);

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 64, &mut out);

    // The stale side-branch common block was rewound to the fork point
    // before enumeration, then advanced over stored main-chain blocks.
    let stats = fixture.manager.node_state_stats(PeerId(1)).unwrap();
    assert_eq!(stats.common_height, 300);
    assert_eq!(out[0], fixture.handle_of(&main_hash(301)));
    let expected: Vec<u32> = (301..=364).collect();
    assert_eq!(fixture.heights(&out), expected);
}

#[test]
fn test_bootstrap_seeds_common_block_from_active_chain() {
    let fixture = SyncFixture::with_local_chain(100);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(99, 120);
    fixture.announce(info.id, peer_tip);

    let mut out = Vec::new();
    fixture
        .manager
        .find_next_blocks_to_download(info.id, 8, &mut out);

    // Seeded at min(peer height, our height) = 99, so requests start at 100.
    assert_eq!(fixture.heights(&out), (100..=107).collect::<Vec<u32>>());
    assert_eq!(
        fixture.manager.node_state_stats(PeerId(1)).unwrap().common_height,
        99
    );
}

// ============================================================================
// Availability bookkeeping
// ============================================================================

#[test]
fn test_announce_new_tip_selects_stale_peers() {
    let fixture = SyncFixture::with_local_chain(11);
    let info1 = fixture.add_peer(1);
    let info2 = fixture.add_peer(2);
    fixture.add_peer(3);
    let deep = fixture.extend_main_headers(10, 30);
    fixture.announce(info1.id, deep);
    fixture.announce(info2.id, fixture.at_height(10));

    let fresh = fixture.handle_of(&main_hash(15));
    let mut stale = fixture.manager.update_best_known_block_all(fresh);
    stale.sort();

    // Peer 1 already knows a deeper block; peers 2 and 3 want the announce.
    assert_eq!(stale, vec![PeerId(2), PeerId(3)]);
}

#[test]
fn test_stats_for_fresh_peer() {
    let fixture = SyncFixture::with_local_chain(5);
    fixture.add_peer(1);

    let stats = fixture.manager.node_state_stats(PeerId(1)).unwrap();
    assert_eq!(stats.sync_height, -1);
    assert_eq!(stats.common_height, -1);
    assert!(stats.in_flight_heights.is_empty());
    assert!(!stats.sync_started);
}

#[test]
fn test_stats_in_flight_heights_sorted() {
    let fixture = SyncFixture::with_local_chain(11);
    let info = fixture.add_preferred_peer(1);
    let peer_tip = fixture.extend_main_headers(10, 40);
    fixture.announce(info.id, peer_tip);
    fixture.manager.request_next_blocks_to_download(&info);

    let stats = fixture.manager.node_state_stats(PeerId(1)).unwrap();
    assert_eq!(stats.in_flight_heights, (11..=40).collect::<Vec<u32>>());
    assert_eq!(stats.in_flight_count, 30);
}

// ============================================================================
// Transaction relay
// ============================================================================

#[test]
fn test_relay_answers_within_ttl_and_expires_after() {
    let fixture = SyncFixture::with_local_chain(2);
    fixture.add_peer(1);
    let tx_a = basalt_net::TxId([0xA; 32]);
    let tx_b = basalt_net::TxId([0xB; 32]);

    fixture.clock.set(0);
    fixture.manager.track_tx_relay(tx_a, vec![0xAA]);

    fixture.clock.set(899);
    assert!(fixture.manager.find_and_push_tx(PeerId(1), &tx_a));

    // The next insert past the deadline evicts the old entry.
    fixture.clock.set(901);
    fixture.manager.track_tx_relay(tx_b, vec![0xBB]);
    assert!(!fixture.manager.find_and_push_tx(PeerId(1), &tx_a));
    assert!(fixture.manager.find_and_push_tx(PeerId(1), &tx_b));
}
