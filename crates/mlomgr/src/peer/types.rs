//! Logical peer types.

use mlo_types::{LinkId, LinkKey, MacAddress, MldId};
use serde::{Deserialize, Serialize};

use super::pending::PendingPeerAdd;
use crate::error::MloError;
use crate::link::{PeerCapabilities, StationState};
use crate::pool::{Aid, LogicalPeerId};

/// Raw association request as received on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocPayload(pub Vec<u8>);

impl AssocPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AssocPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// One partner link announced by the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerLinkInfo {
    pub link_id: LinkId,
    /// Remote device's address on that link.
    pub link_mac: MacAddress,
}

/// Association request after local validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAssociation {
    /// Remote address on the link the request arrived on.
    pub sta_mac: MacAddress,
    /// Device-level address; absent for single-link stations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mld_mac: Option<MacAddress>,
    #[serde(default)]
    pub capabilities: PeerCapabilities,
    #[serde(default)]
    pub partners: Vec<PartnerLinkInfo>,
}

/// Non-owning reference to a station peer held by a logical peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constituent {
    pub link_id: LinkId,
    pub mac: MacAddress,
    pub state: StationState,
}

/// Snapshot of one logical peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPeerInfo {
    pub logical_id: LogicalPeerId,
    pub mld: MldId,
    pub mld_mac: MacAddress,
    pub aid: Aid,
    pub primary_link: LinkId,
    /// Ordered by link id.
    pub constituents: Vec<Constituent>,
    pub partner_link_info: Vec<PartnerLinkInfo>,
    /// True once the upper layer has been told about the association.
    pub registered: bool,
}

impl LogicalPeerInfo {
    /// Every declared link (primary plus partners) holds a station.
    pub fn has_full_quorum(&self) -> bool {
        self.constituents.len() == self.partner_link_info.len() + 1
    }

    pub fn constituent(&self, link_id: LinkId) -> Option<&Constituent> {
        self.constituents.iter().find(|c| c.link_id == link_id)
    }
}

/// Result of one partner fan-out step.
#[derive(Debug)]
pub struct PartnerOutcome {
    pub link_id: LinkId,
    pub link_mac: MacAddress,
    /// `None` when the partner station was created.
    pub error: Option<MloError>,
}

impl PartnerOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Returned by a successful primary association.
///
/// The logical peer already exists; its stations are awaiting hardware
/// confirmation through the pending handles.
#[derive(Debug)]
pub struct LogicalPeerHandle {
    pub logical_id: LogicalPeerId,
    pub aid: Aid,
    pub mld_mac: MacAddress,
    pub primary: LinkKey,
    pub partners: Vec<PartnerOutcome>,
    pub pending: Vec<PendingPeerAdd>,
}

impl LogicalPeerHandle {
    /// Links whose station was created (primary first).
    pub fn constituent_links(&self) -> Vec<LinkId> {
        std::iter::once(self.primary.link)
            .chain(
                self.partners
                    .iter()
                    .filter(|p| p.is_success())
                    .map(|p| p.link_id),
            )
            .collect()
    }

    pub fn failed_partners(&self) -> impl Iterator<Item = &PartnerOutcome> {
        self.partners.iter().filter(|p| !p.is_success())
    }

    pub fn take_pending(&mut self) -> Vec<PendingPeerAdd> {
        std::mem::take(&mut self.pending)
    }
}

/// Hardware verdict for one station add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddCompletion {
    pub link: LinkKey,
    pub mac: MacAddress,
    /// Rejection reason on failure.
    pub result: Result<(), String>,
}

impl PeerAddCompletion {
    pub fn confirmed(link: LinkKey, mac: MacAddress) -> Self {
        Self {
            link,
            mac,
            result: Ok(()),
        }
    }

    pub fn rejected(link: LinkKey, mac: MacAddress, reason: impl Into<String>) -> Self {
        Self {
            link,
            mac,
            result: Err(reason.into()),
        }
    }
}

/// What a completion did to the logical peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Station is active. `registered` is set when this confirmation
    /// announced the logical peer upstream.
    Confirmed {
        logical_id: LogicalPeerId,
        registered: bool,
    },
    /// Primary rejected, or the last remaining station was rejected; the
    /// logical peer was torn down.
    Aborted { logical_id: LogicalPeerId },
    /// Partner rejected; the logical peer lost that link.
    Degraded {
        logical_id: LogicalPeerId,
        link_id: LinkId,
    },
    /// The station or its logical peer no longer exists.
    Stale,
}

/// Peer assembler statistics.
#[derive(Debug, Clone, Default)]
pub struct PeerAssemblerStats {
    pub associations: u64,
    pub association_failures: u64,
    pub partner_successes: u64,
    pub partner_failures: u64,
    pub hardware_rejections: u64,
    pub confirmations: u64,
    pub stale_completions: u64,
    pub teardowns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lid(id: u8) -> LinkId {
        LinkId::new(id).unwrap()
    }

    #[test]
    fn test_quorum_counts_primary() {
        let mac = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        let mut info = LogicalPeerInfo {
            logical_id: 1,
            mld: MldId(1),
            mld_mac: mac,
            aid: 1,
            primary_link: lid(0),
            constituents: vec![Constituent {
                link_id: lid(0),
                mac,
                state: StationState::Pending,
            }],
            partner_link_info: vec![PartnerLinkInfo {
                link_id: lid(1),
                link_mac: mac,
            }],
            registered: false,
        };
        assert!(!info.has_full_quorum());

        info.constituents.push(Constituent {
            link_id: lid(1),
            mac,
            state: StationState::Pending,
        });
        assert!(info.has_full_quorum());
        assert!(info.constituent(lid(1)).is_some());
    }

    #[test]
    fn test_parsed_association_json() {
        let json = r#"{"sta_mac":"02:00:00:00:00:01","partners":[{"link_id":1,"link_mac":"02:00:00:00:01:01"}]}"#;
        let parsed: ParsedAssociation = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.mld_mac, None);
        assert_eq!(parsed.partners.len(), 1);
        assert_eq!(parsed.partners[0].link_id, lid(1));
        assert_eq!(parsed.capabilities, PeerCapabilities::default());
    }
}
