//! Group types and data structures.

use mlo_types::{LinkId, MacAddress, MldId};

/// Result of one barrier evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// No link has declared the group topology yet.
    Unconfigured,
    /// Still waiting for links; the normal, non-error path.
    Waiting { ready: usize, expected: usize },
    /// The barrier opened; these links moved SyncWait -> Up in this pass.
    Released(Vec<LinkId>),
}

impl BarrierOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released(_))
    }

    /// Links released by this pass, empty unless the barrier opened.
    pub fn released_links(&self) -> &[LinkId] {
        match self {
            Self::Released(links) => links,
            _ => &[],
        }
    }
}

/// Point-in-time view of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub mld_id: MldId,
    pub mld_mac: MacAddress,
    pub expected_link_count: Option<usize>,
    pub member_links: Vec<LinkId>,
    pub quiet_bitmap: u16,
}

/// Group coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct GroupCoordinatorStats {
    pub groups_created: u64,
    pub groups_destroyed: u64,
    pub links_attached: u64,
    pub links_detached: u64,
    pub barrier_evaluations: u64,
    pub barrier_releases: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_links() {
        let link = LinkId::new(1).unwrap();
        assert_eq!(BarrierOutcome::Released(vec![link]).released_links(), &[link]);
        assert!(BarrierOutcome::Waiting { ready: 1, expected: 2 }
            .released_links()
            .is_empty());
        assert!(!BarrierOutcome::Unconfigured.is_released());
    }
}
