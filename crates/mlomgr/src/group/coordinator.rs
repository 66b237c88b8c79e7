//! GroupCoordinator implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mlo_types::{LinkId, LinkKey, MacAddress, MldId};
use parking_lot::{Mutex, RwLock};

use super::types::{BarrierOutcome, GroupCoordinatorStats, GroupInfo};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::MloConfig;
use crate::error::{MloError, PoolKind, Result};
use crate::link::{LinkRef, LinkRegistry, LinkSession, LinkState};
use crate::pool::{Aid, SharedIdPool};

/// Callbacks toward the surrounding link-management layer.
pub trait GroupCoordinatorCallbacks: Send + Sync {
    /// Called once for every link the barrier moved SyncWait -> Up.
    fn on_sync_complete(&self, link: LinkKey);
}

/// Group coordinator configuration.
#[derive(Debug, Clone)]
pub struct GroupCoordinatorConfig {
    pub max_links_per_group: usize,
    /// Size of link-local and group-shared AID pools.
    pub max_aid: Aid,
}

impl Default for GroupCoordinatorConfig {
    fn default() -> Self {
        Self::from(&MloConfig::default())
    }
}

impl From<&MloConfig> for GroupCoordinatorConfig {
    fn from(config: &MloConfig) -> Self {
        Self {
            max_links_per_group: config.group.max_links_per_group,
            max_aid: config.pools.max_aid,
        }
    }
}

#[derive(Debug)]
struct MldGroup {
    mld_mac: MacAddress,
    /// Set once by the first link that declares a topology.
    expected_link_count: Option<usize>,
    member_links: BTreeSet<LinkId>,
    quiet_bitmap: u16,
    shared_aids: Arc<SharedIdPool>,
    /// Sharing mode fixed by the first admitted station. Only honored
    /// while the group holds stations.
    pinned_sharing: Option<bool>,
}

impl MldGroup {
    /// Groups of more than one link hand every station of a remote MLD
    /// the same AID on all links, so they draw from one shared pool.
    fn topology_shares_ids(&self) -> bool {
        self.expected_link_count
            .unwrap_or(self.member_links.len())
            > 1
    }
}

/// Owner of all MLD groups and their bring-up barrier.
pub struct GroupCoordinator {
    config: GroupCoordinatorConfig,
    links: Arc<LinkRegistry>,
    groups: RwLock<HashMap<MldId, Arc<Mutex<MldGroup>>>>,
    callbacks: Option<Arc<dyn GroupCoordinatorCallbacks>>,
    stats: Mutex<GroupCoordinatorStats>,
}

impl std::fmt::Debug for GroupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCoordinator")
            .field("config", &self.config)
            .field("group_count", &self.groups.read().len())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl GroupCoordinator {
    pub fn new(config: GroupCoordinatorConfig, links: Arc<LinkRegistry>) -> Self {
        Self {
            config,
            links,
            groups: RwLock::new(HashMap::new()),
            callbacks: None,
            stats: Mutex::new(GroupCoordinatorStats::default()),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn GroupCoordinatorCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn config(&self) -> &GroupCoordinatorConfig {
        &self.config
    }

    pub fn links(&self) -> &Arc<LinkRegistry> {
        &self.links
    }

    pub fn stats(&self) -> GroupCoordinatorStats {
        self.stats.lock().clone()
    }

    fn group(&self, mld: MldId) -> Result<Arc<Mutex<MldGroup>>> {
        self.groups
            .read()
            .get(&mld)
            .cloned()
            .ok_or(MloError::GroupNotFound(mld))
    }

    fn acquire(&self, key: LinkKey) -> Result<LinkRef> {
        self.links.acquire(key).ok_or(MloError::LinkNotFound(key))
    }

    // ============ Group lifecycle ============

    pub fn create_group(&self, mld: MldId, mld_mac: MacAddress) -> Result<()> {
        let mut groups = self.groups.write();
        if groups.contains_key(&mld) {
            return Err(MloError::GroupExists(mld));
        }

        groups.insert(
            mld,
            Arc::new(Mutex::new(MldGroup {
                mld_mac,
                expected_link_count: None,
                member_links: BTreeSet::new(),
                quiet_bitmap: 0,
                shared_aids: Arc::new(SharedIdPool::new(
                    PoolKind::SharedAid,
                    self.config.max_aid as usize,
                )),
                pinned_sharing: None,
            })),
        );
        self.stats.lock().groups_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "GroupCoordinator", "create_group")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(mld.to_string())
                .with_object_type("mld_group")
                .with_details(serde_json::json!({ "mld_mac": mld_mac.to_string() }))
        );

        Ok(())
    }

    /// Tears down an empty group.
    pub fn destroy_group(&self, mld: MldId) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups.get(&mld).ok_or(MloError::GroupNotFound(mld))?;
        if !group.lock().member_links.is_empty() {
            let err = MloError::GroupNotEmpty(mld);
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceDelete, "GroupCoordinator", "destroy_group")
                    .with_object_id(mld.to_string())
                    .with_object_type("mld_group")
                    .with_error(err.to_string())
            );
            return Err(err);
        }

        groups.remove(&mld);
        self.stats.lock().groups_destroyed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "GroupCoordinator", "destroy_group")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(mld.to_string())
                .with_object_type("mld_group")
        );

        Ok(())
    }

    pub fn group_info(&self, mld: MldId) -> Option<GroupInfo> {
        let group = self.group(mld).ok()?;
        let group = group.lock();
        Some(GroupInfo {
            mld_id: mld,
            mld_mac: group.mld_mac,
            expected_link_count: group.expected_link_count,
            member_links: group.member_links.iter().copied().collect(),
            quiet_bitmap: group.quiet_bitmap,
        })
    }

    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    // ============ Membership ============

    /// Attaches a new link session to `mld`.
    ///
    /// `declared_link_count` is the planned topology announced by the
    /// link. The first declaration becomes the group's expected link
    /// count; later ones are ignored.
    pub fn attach_link(
        &self,
        mld: MldId,
        link_id: LinkId,
        link_mac: MacAddress,
        declared_link_count: Option<usize>,
    ) -> Result<LinkRef> {
        let key = LinkKey::new(mld, link_id);
        let group = self.group(mld)?;
        let mut group = group.lock();

        if group.member_links.contains(&link_id) {
            return Err(MloError::DuplicateLink(key));
        }

        let limit = group
            .expected_link_count
            .unwrap_or(self.config.max_links_per_group);
        if group.member_links.len() >= limit {
            let err = MloError::GroupFull { mld, max: limit };
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceCreate, "GroupCoordinator", "attach_link")
                    .with_object_id(key.to_string())
                    .with_object_type("link_session")
                    .with_error(err.to_string())
            );
            return Err(err);
        }

        if let Some(declared) = declared_link_count {
            self.validate_link_count(declared)?;
            match group.expected_link_count {
                None => {
                    if group.member_links.len() >= declared {
                        return Err(MloError::GroupFull { mld, max: declared });
                    }
                    group.expected_link_count = Some(declared);
                    tracing::info!(%mld, expected = declared, "group topology declared");
                }
                Some(expected) if expected != declared => {
                    tracing::debug!(
                        %mld,
                        expected,
                        declared,
                        "ignoring topology declaration from later link"
                    );
                }
                Some(_) => {}
            }
        }

        let link = self
            .links
            .insert(LinkSession::new(key, link_mac, self.config.max_aid))?;
        group.member_links.insert(link_id);
        self.stats.lock().links_attached += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "GroupCoordinator", "attach_link")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(key.to_string())
                .with_object_type("link_session")
                .with_details(serde_json::json!({
                    "link_mac": link_mac.to_string(),
                    "expected_link_count": group.expected_link_count,
                    "member_count": group.member_links.len(),
                }))
        );

        Ok(link)
    }

    /// Removes a link from its group and the registry.
    ///
    /// The expected link count is left untouched, so remaining links keep
    /// waiting at the barrier for a replacement. The returned reference
    /// lets the caller purge the link's peers.
    pub fn detach_link(&self, key: LinkKey) -> Result<LinkRef> {
        let group = self.group(key.mld)?;
        let mut group = group.lock();

        if !group.member_links.remove(&key.link) {
            return Err(MloError::LinkNotFound(key));
        }
        group.quiet_bitmap &= !key.link.bit();

        let link = self
            .links
            .remove(key)
            .ok_or(MloError::LinkNotFound(key))?;
        link.lock().stop();
        self.stats.lock().links_detached += 1;

        if let Some(expected) = group.expected_link_count {
            if group.member_links.len() < expected {
                tracing::info!(
                    link = %key,
                    remaining = group.member_links.len(),
                    expected,
                    "link detached; group waits for missing links"
                );
            }
        }

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "GroupCoordinator", "detach_link")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(key.to_string())
                .with_object_type("link_session")
                .with_details(serde_json::json!({
                    "member_count": group.member_links.len(),
                    "expected_link_count": group.expected_link_count,
                }))
        );

        Ok(link)
    }

    /// Overrides the expected link count and re-runs the barrier.
    pub fn reconfigure_expected_links(&self, mld: MldId, expected: usize) -> Result<BarrierOutcome> {
        self.validate_link_count(expected)?;
        {
            let group = self.group(mld)?;
            let mut group = group.lock();
            if expected < group.member_links.len() {
                return Err(MloError::Configuration(format!(
                    "{} links attached to {}, cannot expect {}",
                    group.member_links.len(),
                    mld,
                    expected
                )));
            }
            let previous = group.expected_link_count.replace(expected);

            audit_log!(
                AuditRecord::new(
                    AuditCategory::ConfigurationChange,
                    "GroupCoordinator",
                    "reconfigure_expected_links"
                )
                .with_outcome(AuditOutcome::Success)
                .with_object_id(mld.to_string())
                .with_object_type("mld_group")
                .with_details(serde_json::json!({
                    "previous": previous,
                    "expected": expected,
                }))
            );
        }
        self.evaluate_barrier(mld)
    }

    fn validate_link_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.config.max_links_per_group {
            return Err(MloError::Configuration(format!(
                "link count {} outside 1-{}",
                count, self.config.max_links_per_group
            )));
        }
        Ok(())
    }

    pub fn members(&self, mld: MldId) -> Result<Vec<LinkId>> {
        let group = self.group(mld)?;
        let members = group.lock().member_links.iter().copied().collect();
        Ok(members)
    }

    // ============ Identifier sharing ============

    /// True when no member link holds a station and no shared AID is out.
    fn is_idle(&self, mld: MldId, group: &MldGroup) -> bool {
        group.shared_aids.in_use() == 0
            && group.member_links.iter().all(|link_id| {
                self.links
                    .acquire(LinkKey::new(mld, *link_id))
                    .map_or(true, |link| link.lock().peer_count() == 0)
            })
    }

    fn effective_sharing(&self, mld: MldId, group: &MldGroup) -> bool {
        match group.pinned_sharing {
            Some(pinned) if !self.is_idle(mld, group) => pinned,
            _ => group.topology_shares_ids(),
        }
    }

    /// Reports the group's sharing mode. While stations are admitted this
    /// is the mode they were admitted under, even if the topology changed.
    pub fn shares_ids(&self, mld: MldId) -> Result<bool> {
        let group = self.group(mld)?;
        let group = group.lock();
        Ok(self.effective_sharing(mld, &group))
    }

    /// Returns the group's shared AID pool if the group shares ids.
    pub fn shared_aid_pool(&self, mld: MldId) -> Result<Option<Arc<SharedIdPool>>> {
        let group = self.group(mld)?;
        let group = group.lock();
        Ok(self
            .effective_sharing(mld, &group)
            .then(|| Arc::clone(&group.shared_aids)))
    }

    /// Picks the AID source for a new association and pins the sharing
    /// mode until the group is idle again. `None` means the primary
    /// link's legacy pool.
    ///
    /// A group with legacy stations stays legacy when a second link
    /// attaches, and a sharing group keeps sharing after links leave.
    pub fn admission_aid_pool(&self, mld: MldId) -> Result<Option<Arc<SharedIdPool>>> {
        let group = self.group(mld)?;
        let mut group = group.lock();
        let shares = self.effective_sharing(mld, &group);
        if group.pinned_sharing != Some(shares) {
            tracing::debug!(%mld, shares, "AID sharing mode pinned");
            group.pinned_sharing = Some(shares);
        }
        Ok(shares.then(|| Arc::clone(&group.shared_aids)))
    }

    /// Returns the group's shared AID pool regardless of sharing mode.
    pub fn group_aid_pool(&self, mld: MldId) -> Result<Arc<SharedIdPool>> {
        Ok(Arc::clone(&self.group(mld)?.lock().shared_aids))
    }

    // ============ Link lifecycle ============

    /// Down -> Starting.
    pub fn start_link(&self, key: LinkKey) -> Result<()> {
        self.acquire(key)?.lock().start()
    }

    /// Starting -> SyncWait, then runs the barrier for the link's group.
    pub fn link_bring_up_complete(&self, key: LinkKey) -> Result<BarrierOutcome> {
        self.acquire(key)?.lock().bring_up_complete()?;
        self.on_link_ready(key)
    }

    /// Records channel validity. A link whose channel became valid
    /// re-runs the barrier; an invalidation is only recorded.
    pub fn set_channel_valid(&self, key: LinkKey, valid: bool) -> Result<Option<BarrierOutcome>> {
        let ready = {
            let link = self.acquire(key)?;
            let mut session = link.lock();
            let changed = session.channel_valid() != valid;
            session.set_channel_valid(valid);
            changed && valid && session.state().is_ready()
        };

        if ready {
            return self.on_link_ready(key).map(Some);
        }
        Ok(None)
    }

    /// Any state -> Down.
    pub fn stop_link(&self, key: LinkKey) -> Result<()> {
        self.acquire(key)?.lock().stop();
        Ok(())
    }

    pub fn link_state(&self, key: LinkKey) -> Option<LinkState> {
        self.links.acquire(key).map(|link| link.lock().state())
    }

    // ============ Barrier ============

    /// Readiness notification from one link.
    pub fn on_link_ready(&self, key: LinkKey) -> Result<BarrierOutcome> {
        let mld = self.acquire(key)?.lock().group_ref();
        self.evaluate_barrier(mld)
    }

    /// Counts ready links and, once all expected links are ready,
    /// releases every link still in SyncWait.
    ///
    /// `attach_link` rejects members beyond the expected count with
    /// [`MloError::GroupFull`], so `ready` never exceeds `expected`. The
    /// overshoot arm only logs and keeps the barrier closed; it is not a
    /// supported state.
    pub fn evaluate_barrier(&self, mld: MldId) -> Result<BarrierOutcome> {
        let (members, expected) = {
            let group = self.group(mld)?;
            let group = group.lock();
            let members: Vec<LinkId> = group.member_links.iter().copied().collect();
            (members, group.expected_link_count)
        };
        self.stats.lock().barrier_evaluations += 1;

        let Some(expected) = expected else {
            tracing::debug!(%mld, "barrier evaluated before topology declared");
            return Ok(BarrierOutcome::Unconfigured);
        };

        let ready = members
            .iter()
            .filter_map(|link| self.links.acquire(LinkKey::new(mld, *link)))
            .filter(|link| link.lock().is_barrier_ready())
            .count();

        match ready.cmp(&expected) {
            std::cmp::Ordering::Less => {
                tracing::debug!(%mld, ready, expected, "barrier closed");
                return Ok(BarrierOutcome::Waiting { ready, expected });
            }
            // Unreachable while attach_link enforces the cap.
            std::cmp::Ordering::Greater => {
                tracing::warn!(%mld, ready, expected, "more ready links than expected");
                return Ok(BarrierOutcome::Waiting { ready, expected });
            }
            std::cmp::Ordering::Equal => {}
        }

        let mut released = Vec::new();
        for link_id in members {
            let key = LinkKey::new(mld, link_id);
            let Some(link) = self.links.acquire(key) else {
                continue;
            };
            let mut session = link.lock();
            if session.state() == LinkState::SyncWait && session.sync_complete().is_ok() {
                released.push(link_id);
            }
        }

        if !released.is_empty() {
            self.stats.lock().barrier_releases += 1;
            audit_log!(
                AuditRecord::new(AuditCategory::BarrierSync, "GroupCoordinator", "release_barrier")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(mld.to_string())
                    .with_object_type("mld_group")
                    .with_details(serde_json::json!({
                        "expected": expected,
                        "released": released.iter().map(|l| l.value()).collect::<Vec<_>>(),
                    }))
            );
            if let Some(callbacks) = &self.callbacks {
                for link_id in &released {
                    callbacks.on_sync_complete(LinkKey::new(mld, *link_id));
                }
            }
        }

        Ok(BarrierOutcome::Released(released))
    }

    // ============ Quiet bitmap ============

    /// Sets or clears the quiet bit of a member link; returns the new
    /// bitmap.
    pub fn set_link_quiet(&self, mld: MldId, link_id: LinkId, quiet: bool) -> Result<u16> {
        let group = self.group(mld)?;
        let mut group = group.lock();
        if !group.member_links.contains(&link_id) {
            return Err(MloError::LinkNotFound(LinkKey::new(mld, link_id)));
        }
        if quiet {
            group.quiet_bitmap |= link_id.bit();
        } else {
            group.quiet_bitmap &= !link_id.bit();
        }
        tracing::debug!(%mld, link = %link_id, quiet, bitmap = group.quiet_bitmap, "quiet bitmap updated");
        Ok(group.quiet_bitmap)
    }

    pub fn quiet_bitmap(&self, mld: MldId) -> Result<u16> {
        Ok(self.group(mld)?.lock().quiet_bitmap)
    }

    pub fn is_link_quiet(&self, mld: MldId, link_id: LinkId) -> Result<bool> {
        Ok(self.quiet_bitmap(mld)? & link_id.bit() != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct TestCallbacks {
        synced: Mutex<Vec<LinkKey>>,
    }

    impl GroupCoordinatorCallbacks for TestCallbacks {
        fn on_sync_complete(&self, link: LinkKey) {
            self.synced.lock().push(link);
        }
    }

    const MLD: MldId = MldId(1);

    fn lid(id: u8) -> LinkId {
        LinkId::new(id).unwrap()
    }

    fn key(id: u8) -> LinkKey {
        LinkKey::new(MLD, lid(id))
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn coordinator() -> (GroupCoordinator, Arc<TestCallbacks>) {
        let mut coord = GroupCoordinator::new(
            GroupCoordinatorConfig {
                max_links_per_group: 3,
                max_aid: 16,
            },
            Arc::new(LinkRegistry::new()),
        );
        let callbacks = Arc::new(TestCallbacks {
            synced: Mutex::new(Vec::new()),
        });
        coord.set_callbacks(callbacks.clone());
        coord.create_group(MLD, mac(0xff)).unwrap();
        (coord, callbacks)
    }

    fn bring_to_sync_wait(coord: &GroupCoordinator, id: u8) -> BarrierOutcome {
        coord.set_channel_valid(key(id), true).unwrap();
        coord.start_link(key(id)).unwrap();
        coord.link_bring_up_complete(key(id)).unwrap()
    }

    #[test]
    fn test_two_link_barrier() {
        let (coord, callbacks) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(2)).unwrap();
        coord.attach_link(MLD, lid(1), mac(1), Some(2)).unwrap();

        let outcome = bring_to_sync_wait(&coord, 0);
        assert_eq!(outcome, BarrierOutcome::Waiting { ready: 1, expected: 2 });
        assert_eq!(coord.link_state(key(0)), Some(LinkState::SyncWait));

        let outcome = bring_to_sync_wait(&coord, 1);
        assert_eq!(outcome, BarrierOutcome::Released(vec![lid(0), lid(1)]));
        assert_eq!(coord.link_state(key(0)), Some(LinkState::Up));
        assert_eq!(coord.link_state(key(1)), Some(LinkState::Up));
        assert_eq!(*callbacks.synced.lock(), vec![key(0), key(1)]);
        assert_eq!(coord.stats().barrier_releases, 1);
    }

    #[test]
    fn test_unconfigured_barrier_stays_closed() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), None).unwrap();
        let outcome = bring_to_sync_wait(&coord, 0);
        assert_eq!(outcome, BarrierOutcome::Unconfigured);
        assert_eq!(coord.link_state(key(0)), Some(LinkState::SyncWait));
    }

    #[test]
    fn test_invalid_channel_not_counted() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(1)).unwrap();
        coord.start_link(key(0)).unwrap();
        let outcome = coord.link_bring_up_complete(key(0)).unwrap();
        assert_eq!(outcome, BarrierOutcome::Waiting { ready: 0, expected: 1 });

        // Channel becoming valid re-runs the barrier.
        let outcome = coord.set_channel_valid(key(0), true).unwrap();
        assert_eq!(outcome, Some(BarrierOutcome::Released(vec![lid(0)])));
    }

    #[test]
    fn test_up_links_are_skipped_on_rerun() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(1)).unwrap();
        bring_to_sync_wait(&coord, 0);
        assert_eq!(coord.link_state(key(0)), Some(LinkState::Up));

        let outcome = coord.on_link_ready(key(0)).unwrap();
        assert_eq!(outcome, BarrierOutcome::Released(vec![]));
        assert_eq!(coord.stats().barrier_releases, 1);
    }

    #[test]
    fn test_first_declaration_wins() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(2)).unwrap();
        coord.attach_link(MLD, lid(1), mac(1), Some(3)).unwrap();
        assert_eq!(coord.group_info(MLD).unwrap().expected_link_count, Some(2));

        // Expected count caps membership.
        assert!(matches!(
            coord.attach_link(MLD, lid(2), mac(2), None),
            Err(MloError::GroupFull { max: 2, .. })
        ));
    }

    #[test]
    fn test_ready_count_capped_at_expected() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(1)).unwrap();
        assert_eq!(bring_to_sync_wait(&coord, 0), BarrierOutcome::Released(vec![lid(0)]));

        assert!(matches!(
            coord.attach_link(MLD, lid(1), mac(1), None),
            Err(MloError::GroupFull { max: 1, .. })
        ));
        assert_eq!(coord.on_link_ready(key(0)).unwrap(), BarrierOutcome::Released(vec![]));
    }

    #[test]
    fn test_duplicate_and_missing_group() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), None).unwrap();
        assert!(matches!(
            coord.attach_link(MLD, lid(0), mac(0), None),
            Err(MloError::DuplicateLink(_))
        ));
        assert!(matches!(
            coord.attach_link(MldId(9), lid(0), mac(0), None),
            Err(MloError::GroupNotFound(_))
        ));
        assert!(matches!(
            coord.attach_link(MLD, lid(1), mac(1), Some(7)),
            Err(MloError::Configuration(_))
        ));
    }

    #[test]
    fn test_detach_keeps_expected_count() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(2)).unwrap();
        coord.attach_link(MLD, lid(1), mac(1), None).unwrap();
        bring_to_sync_wait(&coord, 0);

        coord.detach_link(key(1)).unwrap();
        assert_eq!(coord.group_info(MLD).unwrap().expected_link_count, Some(2));
        assert!(coord.link_state(key(1)).is_none());

        let outcome = coord.on_link_ready(key(0)).unwrap();
        assert_eq!(outcome, BarrierOutcome::Waiting { ready: 1, expected: 2 });

        // Explicit reconfiguration lets the survivor through.
        let outcome = coord.reconfigure_expected_links(MLD, 1).unwrap();
        assert_eq!(outcome, BarrierOutcome::Released(vec![lid(0)]));
    }

    #[test]
    fn test_reconfigure_below_members_rejected() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(2)).unwrap();
        coord.attach_link(MLD, lid(1), mac(1), None).unwrap();
        assert!(matches!(
            coord.reconfigure_expected_links(MLD, 1),
            Err(MloError::Configuration(_))
        ));
    }

    #[test]
    fn test_destroy_group() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), None).unwrap();
        assert!(matches!(coord.destroy_group(MLD), Err(MloError::GroupNotEmpty(_))));
        coord.detach_link(key(0)).unwrap();
        coord.destroy_group(MLD).unwrap();
        assert_eq!(coord.group_count(), 0);
    }

    #[test]
    fn test_quiet_bitmap() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(3)).unwrap();
        coord.attach_link(MLD, lid(2), mac(2), None).unwrap();

        assert_eq!(coord.set_link_quiet(MLD, lid(2), true).unwrap(), 0b100);
        assert_eq!(coord.set_link_quiet(MLD, lid(0), true).unwrap(), 0b101);
        assert!(coord.is_link_quiet(MLD, lid(2)).unwrap());
        assert_eq!(coord.set_link_quiet(MLD, lid(2), false).unwrap(), 0b001);
        assert!(matches!(
            coord.set_link_quiet(MLD, lid(1), true),
            Err(MloError::LinkNotFound(_))
        ));

        coord.detach_link(key(0)).unwrap();
        assert_eq!(coord.quiet_bitmap(MLD).unwrap(), 0);
    }

    #[test]
    fn test_id_sharing_follows_topology() {
        let (coord, _) = coordinator();
        coord.attach_link(MLD, lid(0), mac(0), Some(1)).unwrap();
        assert!(!coord.shares_ids(MLD).unwrap());
        assert!(coord.shared_aid_pool(MLD).unwrap().is_none());

        coord.create_group(MldId(2), mac(0xfe)).unwrap();
        coord
            .attach_link(MldId(2), lid(0), mac(0x10), Some(2))
            .unwrap();
        assert!(coord.shares_ids(MldId(2)).unwrap());
        assert!(coord.shared_aid_pool(MldId(2)).unwrap().is_some());
    }
}
