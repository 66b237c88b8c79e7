//! Per-link station records.

use mlo_types::{LinkId, MacAddress};
use serde::{Deserialize, Serialize};

use crate::pool::{Aid, LogicalPeerId};

/// Capabilities negotiated for one station on one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    #[serde(default)]
    pub qos: bool,
    #[serde(default)]
    pub ht: bool,
    #[serde(default)]
    pub vht: bool,
    #[serde(default)]
    pub he: bool,
    #[serde(default)]
    pub eht: bool,
}

/// Hardware state of a station peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationState {
    /// Submitted to firmware, awaiting confirmation.
    Pending,
    /// Confirmed by firmware.
    Active,
}

/// One physical association on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationPeer {
    pub mac: MacAddress,
    pub aid: Aid,
    pub link_id: LinkId,
    pub capabilities: PeerCapabilities,
    pub state: StationState,
    /// Logical peer this station belongs to, if any.
    pub logical_id: Option<LogicalPeerId>,
}

impl StationPeer {
    pub fn new(mac: MacAddress, aid: Aid, link_id: LinkId, capabilities: PeerCapabilities) -> Self {
        Self {
            mac,
            aid,
            link_id,
            capabilities,
            state: StationState::Pending,
            logical_id: None,
        }
    }

    pub fn with_logical_id(mut self, logical_id: LogicalPeerId) -> Self {
        self.logical_id = Some(logical_id);
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == StationState::Active
    }
}
