//! Simulated driver.
//!
//! Stands in for the association codec, firmware and upper layer when no
//! real driver is present. Association requests are JSON-encoded
//! [`ParsedAssociation`]s; every station add is confirmed immediately.

use std::collections::{HashMap, HashSet};

use mlo_types::{LinkKey, MacAddress};
use parking_lot::Mutex;

use crate::error::{MloError, Result};
use crate::group::GroupCoordinatorCallbacks;
use crate::peer::{AssocPayload, LogicalPeerInfo, ParsedAssociation, PeerAssemblerCallbacks, PendingPeerAdd};
use crate::pool::Aid;

#[derive(Debug, Default)]
struct SimState {
    /// Stations programmed per link, with their AID.
    hw_peers: HashMap<LinkKey, HashMap<MacAddress, Aid>>,
    /// Links whose firmware rejects every add.
    rejecting: HashSet<LinkKey>,
    associated: Vec<MacAddress>,
    disconnected: Vec<MacAddress>,
    synced: Vec<LinkKey>,
}

/// In-memory driver with a JSON association codec.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes an association request the way this driver parses it.
    pub fn encode(parsed: &ParsedAssociation) -> Result<AssocPayload> {
        serde_json::to_vec(parsed)
            .map(AssocPayload)
            .map_err(|e| MloError::InvalidAssociation(e.to_string()))
    }

    /// Makes firmware on `link` reject (or accept again) station adds.
    pub fn set_rejecting(&self, link: LinkKey, rejecting: bool) {
        let mut state = self.state.lock();
        if rejecting {
            state.rejecting.insert(link);
        } else {
            state.rejecting.remove(&link);
        }
    }

    pub fn hw_peer_count(&self, link: LinkKey) -> usize {
        self.state.lock().hw_peers.get(&link).map_or(0, HashMap::len)
    }

    pub fn hw_aid(&self, link: LinkKey, mac: &MacAddress) -> Option<Aid> {
        self.state.lock().hw_peers.get(&link)?.get(mac).copied()
    }

    pub fn associated(&self) -> Vec<MacAddress> {
        self.state.lock().associated.clone()
    }

    pub fn disconnected(&self) -> Vec<MacAddress> {
        self.state.lock().disconnected.clone()
    }

    pub fn synced_links(&self) -> Vec<LinkKey> {
        self.state.lock().synced.clone()
    }
}

impl PeerAssemblerCallbacks for SimulatedDriver {
    fn parse_and_validate(&self, link: LinkKey, payload: &AssocPayload) -> Result<ParsedAssociation> {
        if payload.is_empty() {
            return Err(MloError::InvalidAssociation(format!("empty request on {}", link)));
        }
        let parsed: ParsedAssociation = serde_json::from_slice(payload.as_bytes())
            .map_err(|e| MloError::InvalidAssociation(e.to_string()))?;
        if parsed.capabilities.eht && !parsed.capabilities.he {
            return Err(MloError::InvalidAssociation(
                "EHT requires HE capability".to_string(),
            ));
        }
        Ok(parsed)
    }

    fn retarget_payload(
        &self,
        payload: &AssocPayload,
        link: LinkKey,
        link_mac: MacAddress,
    ) -> Result<AssocPayload> {
        let retarget_err = |reason: String| MloError::PayloadRetargetFailed { link, reason };
        if !link_mac.is_valid_station() {
            return Err(retarget_err(format!("{} is not a station address", link_mac)));
        }
        let mut parsed: ParsedAssociation =
            serde_json::from_slice(payload.as_bytes()).map_err(|e| retarget_err(e.to_string()))?;
        parsed.sta_mac = link_mac;
        parsed.partners.clear();
        serde_json::to_vec(&parsed)
            .map(AssocPayload)
            .map_err(|e| retarget_err(e.to_string()))
    }

    fn add_peer(&self, link: LinkKey, mac: MacAddress, aid: Aid) -> Result<PendingPeerAdd> {
        let mut state = self.state.lock();
        if state.rejecting.contains(&link) {
            tracing::debug!(%link, %mac, "simulated firmware rejects peer");
            return Ok(PendingPeerAdd::ready(link, mac, Err("simulated rejection".to_string())));
        }
        state.hw_peers.entry(link).or_default().insert(mac, aid);
        tracing::debug!(%link, %mac, aid, "simulated peer added");
        Ok(PendingPeerAdd::ready(link, mac, Ok(())))
    }

    fn del_peer(&self, link: LinkKey, mac: MacAddress) -> Result<()> {
        let mut state = self.state.lock();
        let removed = state
            .hw_peers
            .get_mut(&link)
            .and_then(|peers| peers.remove(&mac))
            .is_some();
        if !removed {
            tracing::debug!(%link, %mac, "simulated delete of unknown peer");
        }
        Ok(())
    }

    fn notify_associated(&self, peer: &LogicalPeerInfo) {
        tracing::info!(
            logical_id = peer.logical_id,
            mld_mac = %peer.mld_mac,
            links = peer.constituents.len(),
            "station associated"
        );
        self.state.lock().associated.push(peer.mld_mac);
    }

    fn notify_disconnected(&self, mld_mac: MacAddress) {
        tracing::info!(%mld_mac, "station disconnected");
        self.state.lock().disconnected.push(mld_mac);
    }
}

impl GroupCoordinatorCallbacks for SimulatedDriver {
    fn on_sync_complete(&self, link: LinkKey) {
        tracing::info!(%link, "link up");
        self.state.lock().synced.push(link);
    }
}
