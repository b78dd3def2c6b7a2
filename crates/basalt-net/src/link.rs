//! Outbound link to peers.
//!
//! [`PeerLink`] is the only way the sync layer talks to the network. The
//! production implementation buffers onto a channel and never blocks, so
//! callers may hold their own locks around a send without risking a stall.

use crate::error::{NetError, NetResult};
use crate::message::{Inv, Locator, Message};
use crate::peer::PeerId;
use basalt_chain::BlockHash;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Outbound message capability, one method per message the sync layer emits.
pub trait PeerLink: Send + Sync {
    /// Queue a `getheaders` for `peer`.
    fn send_getheaders(&self, peer: PeerId, locator: Locator, stop: BlockHash) -> NetResult<()>;

    /// Queue a `getdata` for `peer`.
    fn send_getdata(&self, peer: PeerId, inv: Vec<Inv>) -> NetResult<()>;

    /// Queue a raw transaction for `peer`.
    fn send_tx(&self, peer: PeerId, raw: Vec<u8>) -> NetResult<()>;
}

/// Channel-backed link: hands `(peer, message)` pairs to the transport task.
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<(PeerId, Message)>,
}

impl ChannelLink {
    /// Create a link and the receiving end for the transport task.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(PeerId, Message)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, peer: PeerId, message: Message) -> NetResult<()> {
        self.tx
            .send((peer, message))
            .map_err(|_| NetError::ChannelClosed)
    }
}

impl PeerLink for ChannelLink {
    fn send_getheaders(&self, peer: PeerId, locator: Locator, stop: BlockHash) -> NetResult<()> {
        self.push(peer, Message::GetHeaders { locator, stop })
    }

    fn send_getdata(&self, peer: PeerId, inv: Vec<Inv>) -> NetResult<()> {
        self.push(peer, Message::GetData(inv))
    }

    fn send_tx(&self, peer: PeerId, raw: Vec<u8>) -> NetResult<()> {
        self.push(peer, Message::Tx(raw))
    }
}

/// Link double that records every send; used throughout the tests.
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<(PeerId, Message)>>,
}

impl RecordingLink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(PeerId, Message)> {
        self.sent.lock().clone()
    }

    /// Drain and return everything sent so far.
    pub fn take(&self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Messages sent to one peer.
    pub fn sent_to(&self, peer: PeerId) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| *p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl PeerLink for RecordingLink {
    fn send_getheaders(&self, peer: PeerId, locator: Locator, stop: BlockHash) -> NetResult<()> {
        self.sent
            .lock()
            .push((peer, Message::GetHeaders { locator, stop }));
        Ok(())
    }

    fn send_getdata(&self, peer: PeerId, inv: Vec<Inv>) -> NetResult<()> {
        self.sent.lock().push((peer, Message::GetData(inv)));
        Ok(())
    }

    fn send_tx(&self, peer: PeerId, raw: Vec<u8>) -> NetResult<()> {
        self.sent.lock().push((peer, Message::Tx(raw)));
        Ok(())
    }
}
