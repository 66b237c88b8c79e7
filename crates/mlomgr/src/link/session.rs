//! Per-link session state.

use std::collections::HashMap;

use mlo_types::{LinkId, LinkKey, MacAddress, MldId};

use super::station::{StationPeer, StationState};
use crate::error::{MloError, Result};
use crate::pool::{Aid, AidFreeList};

/// Bring-up state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Down,
    /// Local bring-up in progress.
    Starting,
    /// Locally ready, held until the whole group is ready.
    SyncWait,
    Up,
}

impl LinkState {
    /// Returns true for links that count toward the group barrier.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::SyncWait | Self::Up)
    }
}

/// State of one constituent link of an MLD.
#[derive(Debug)]
pub struct LinkSession {
    key: LinkKey,
    link_mac: MacAddress,
    state: LinkState,
    channel_valid: bool,
    local_peers: HashMap<MacAddress, StationPeer>,
    local_aid_pool: AidFreeList,
}

impl LinkSession {
    pub fn new(key: LinkKey, link_mac: MacAddress, max_aid: Aid) -> Self {
        Self {
            key,
            link_mac,
            state: LinkState::Down,
            channel_valid: false,
            local_peers: HashMap::new(),
            local_aid_pool: AidFreeList::new(max_aid),
        }
    }

    pub fn key(&self) -> LinkKey {
        self.key
    }

    pub fn link_id(&self) -> LinkId {
        self.key.link
    }

    /// Back-reference to the owning group, by id only.
    pub fn group_ref(&self) -> MldId {
        self.key.mld
    }

    pub fn link_mac(&self) -> MacAddress {
        self.link_mac
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn channel_valid(&self) -> bool {
        self.channel_valid
    }

    pub fn set_channel_valid(&mut self, valid: bool) {
        self.channel_valid = valid;
    }

    /// Returns true if this link counts toward the group barrier.
    pub fn is_barrier_ready(&self) -> bool {
        self.state.is_ready() && self.channel_valid
    }

    fn transition(&mut self, from: LinkState, to: LinkState) -> Result<()> {
        if self.state != from {
            return Err(MloError::InvalidTransition {
                link: self.key,
                from: self.state,
                to,
            });
        }
        tracing::debug!(link = %self.key, ?from, ?to, "link state transition");
        self.state = to;
        Ok(())
    }

    /// Down -> Starting.
    pub fn start(&mut self) -> Result<()> {
        self.transition(LinkState::Down, LinkState::Starting)
    }

    /// Starting -> SyncWait, once local bring-up has completed.
    pub fn bring_up_complete(&mut self) -> Result<()> {
        self.transition(LinkState::Starting, LinkState::SyncWait)
    }

    /// SyncWait -> Up, delivered by the group barrier.
    pub fn sync_complete(&mut self) -> Result<()> {
        self.transition(LinkState::SyncWait, LinkState::Up)
    }

    /// Any state -> Down.
    pub fn stop(&mut self) {
        if self.state != LinkState::Down {
            tracing::debug!(link = %self.key, from = ?self.state, "link stopped");
        }
        self.state = LinkState::Down;
    }

    pub fn aid_pool(&self) -> &AidFreeList {
        &self.local_aid_pool
    }

    pub fn aid_pool_mut(&mut self) -> &mut AidFreeList {
        &mut self.local_aid_pool
    }

    // ============ Station table ============

    /// Inserts a station; fails if the MAC is already present on this link.
    pub fn insert_peer(&mut self, peer: StationPeer) -> Result<()> {
        if self.local_peers.contains_key(&peer.mac) {
            return Err(MloError::PeerExists(peer.mac));
        }
        self.local_peers.insert(peer.mac, peer);
        Ok(())
    }

    pub fn remove_peer(&mut self, mac: &MacAddress) -> Option<StationPeer> {
        self.local_peers.remove(mac)
    }

    pub fn peer(&self, mac: &MacAddress) -> Option<&StationPeer> {
        self.local_peers.get(mac)
    }

    /// Marks a pending station as confirmed by hardware.
    pub fn activate_peer(&mut self, mac: &MacAddress) -> Result<()> {
        let peer = self
            .local_peers
            .get_mut(mac)
            .ok_or(MloError::StationNotFound {
                link: self.key,
                mac: *mac,
            })?;
        peer.state = StationState::Active;
        Ok(())
    }

    /// Returns true if a station on this link already holds `aid`.
    pub fn aid_in_use(&self, aid: Aid) -> bool {
        self.local_peers.values().any(|peer| peer.aid == aid)
    }

    pub fn peer_count(&self) -> usize {
        self.local_peers.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &StationPeer> {
        self.local_peers.values()
    }
}
