//! Pending hardware peer-add handles.
//!
//! A station add is submitted to firmware and confirmed later. The
//! driver keeps the [`PeerAddResponder`] and answers once; the
//! coordinator side holds the matching [`PendingPeerAdd`] and turns the
//! answer into a [`PeerAddCompletion`] for
//! [`PeerAssembler::on_peer_add_complete`](super::PeerAssembler::on_peer_add_complete).

use mlo_types::{LinkKey, MacAddress};
use tokio::sync::oneshot;

use super::types::PeerAddCompletion;

/// Creates a linked responder / pending pair for one station add.
pub fn pending_peer_add(link: LinkKey, mac: MacAddress) -> (PeerAddResponder, PendingPeerAdd) {
    let (tx, rx) = oneshot::channel();
    (
        PeerAddResponder { link, mac, tx },
        PendingPeerAdd { link, mac, rx },
    )
}

/// Driver side of a pending station add.
#[derive(Debug)]
pub struct PeerAddResponder {
    link: LinkKey,
    mac: MacAddress,
    tx: oneshot::Sender<Result<(), String>>,
}

impl PeerAddResponder {
    pub fn link(&self) -> LinkKey {
        self.link
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn confirm(self) {
        self.respond(Ok(()));
    }

    pub fn reject(self, reason: impl Into<String>) {
        self.respond(Err(reason.into()));
    }

    fn respond(self, result: Result<(), String>) {
        if self.tx.send(result).is_err() {
            tracing::debug!(link = %self.link, mac = %self.mac, "peer add waiter already gone");
        }
    }
}

/// Coordinator side of a pending station add.
#[derive(Debug)]
pub struct PendingPeerAdd {
    link: LinkKey,
    mac: MacAddress,
    rx: oneshot::Receiver<Result<(), String>>,
}

impl PendingPeerAdd {
    /// A pending add whose verdict is already known.
    pub fn ready(link: LinkKey, mac: MacAddress, result: Result<(), String>) -> Self {
        let (responder, pending) = pending_peer_add(link, mac);
        responder.respond(result);
        pending
    }

    pub fn link(&self) -> LinkKey {
        self.link
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Waits for the driver's verdict. A responder dropped without
    /// answering counts as a rejection.
    pub async fn wait(self) -> PeerAddCompletion {
        let result = self
            .rx
            .await
            .unwrap_or_else(|_| Err("driver dropped peer add".to_string()));
        PeerAddCompletion {
            link: self.link,
            mac: self.mac,
            result,
        }
    }

    /// Non-blocking poll; `None` while the driver has not answered.
    pub fn try_complete(&mut self) -> Option<PeerAddCompletion> {
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err("driver dropped peer add".to_string()),
        };
        Some(PeerAddCompletion {
            link: self.link,
            mac: self.mac,
            result,
        })
    }
}
