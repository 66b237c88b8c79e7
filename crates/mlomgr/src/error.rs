//! Error types for the multi-link coordinator.

use mlo_types::{LinkKey, MacAddress, MldId};
use thiserror::Error;

use crate::link::LinkState;

/// Which identifier pool ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Per-link legacy AID free list.
    LinkAid,
    /// Group-wide shared AID bitmap.
    SharedAid,
    /// Global logical-peer id bitmap.
    LogicalPeer,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkAid => write!(f, "link AID"),
            Self::SharedAid => write!(f, "shared AID"),
            Self::LogicalPeer => write!(f, "logical peer id"),
        }
    }
}

/// Multi-link coordinator errors.
///
/// Every failure is scoped to one peer or one link; none is fatal to the
/// process.
#[derive(Error, Debug)]
pub enum MloError {
    /// No identifiers left; the association is refused, never retried here.
    #[error("{pool} pool exhausted")]
    PoolExhausted { pool: PoolKind },

    /// The referenced link is not attached (or is detaching).
    #[error("link not found: {0}")]
    LinkNotFound(LinkKey),

    #[error("group not found: {0}")]
    GroupNotFound(MldId),

    /// A partner declaration could not be re-targeted to its link.
    #[error("payload retarget failed for {link}: {reason}")]
    PayloadRetargetFailed { link: LinkKey, reason: String },

    /// The association payload failed local validation.
    #[error("invalid association: {0}")]
    InvalidAssociation(String),

    /// Firmware declined the peer add.
    #[error("hardware rejected peer on {link}: {reason}")]
    HardwareRejected { link: LinkKey, reason: String },

    #[error("logical peer not found: {0}")]
    PeerNotFound(u16),

    #[error("station {mac} not found on {link}")]
    StationNotFound { link: LinkKey, mac: MacAddress },

    #[error("peer already associated: {0}")]
    PeerExists(MacAddress),

    #[error("link already attached: {0}")]
    DuplicateLink(LinkKey),

    #[error("group {mld} is full ({max} links)")]
    GroupFull { mld: MldId, max: usize },

    #[error("group {0} still has attached links")]
    GroupNotEmpty(MldId),

    #[error("group already exists: {0}")]
    GroupExists(MldId),

    #[error("invalid transition on {link}: {from:?} -> {to:?}")]
    InvalidTransition {
        link: LinkKey,
        from: LinkState,
        to: LinkState,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The daemon event loop is gone.
    #[error("daemon channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MloError {
    /// Returns true for the per-partner failures that are skipped during
    /// fan-out instead of aborting the association.
    pub fn is_partner_skippable(&self) -> bool {
        matches!(
            self,
            Self::LinkNotFound(_)
                | Self::PayloadRetargetFailed { .. }
                | Self::InvalidAssociation(_)
                | Self::HardwareRejected { .. }
                | Self::PeerExists(_)
        )
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, MloError>;

#[cfg(test)]
mod tests {
    use super::*;
    use mlo_types::LinkId;

    fn key() -> LinkKey {
        LinkKey::new(MldId(1), LinkId::new(2).unwrap())
    }

    #[test]
    fn test_error_display() {
        let err = MloError::PoolExhausted {
            pool: PoolKind::LogicalPeer,
        };
        assert_eq!(err.to_string(), "logical peer id pool exhausted");

        let err = MloError::LinkNotFound(key());
        assert_eq!(err.to_string(), "link not found: mld1/link2");
    }

    #[test]
    fn test_partner_skippable() {
        assert!(MloError::LinkNotFound(key()).is_partner_skippable());
        assert!(MloError::PayloadRetargetFailed {
            link: key(),
            reason: "bad".to_string()
        }
        .is_partner_skippable());
        assert!(!MloError::PoolExhausted {
            pool: PoolKind::SharedAid
        }
        .is_partner_skippable());
    }
}
