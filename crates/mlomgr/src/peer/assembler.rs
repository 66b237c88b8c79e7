//! PeerAssembler implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use mlo_types::{LinkId, LinkKey, MacAddress, MldId};
use parking_lot::Mutex;

use super::pending::PendingPeerAdd;
use super::types::{
    AssocPayload, CompletionOutcome, Constituent, LogicalPeerHandle, LogicalPeerInfo,
    ParsedAssociation, PartnerLinkInfo, PartnerOutcome, PeerAddCompletion, PeerAssemblerStats,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::MloConfig;
use crate::error::{MloError, PoolKind, Result};
use crate::group::GroupCoordinator;
use crate::link::{LinkRef, StationPeer, StationState};
use crate::pool::{Aid, LogicalPeerId, SharedIdPool};

/// Collaborators the assembler drives but does not implement.
///
/// Callbacks are invoked with the assembler's state lock held and must
/// not call back into the assembler.
pub trait PeerAssemblerCallbacks: Send + Sync {
    /// Capability negotiation and sequence checks for a request received
    /// on `link`.
    fn parse_and_validate(&self, link: LinkKey, payload: &AssocPayload) -> Result<ParsedAssociation>;

    /// Derives `link`'s local view of the primary request. Failures should
    /// be reported as [`MloError::PayloadRetargetFailed`].
    fn retarget_payload(
        &self,
        payload: &AssocPayload,
        link: LinkKey,
        link_mac: MacAddress,
    ) -> Result<AssocPayload>;

    /// Submits a station to firmware. An `Err` is a synchronous rejection.
    fn add_peer(&self, link: LinkKey, mac: MacAddress, aid: Aid) -> Result<PendingPeerAdd>;

    fn del_peer(&self, link: LinkKey, mac: MacAddress) -> Result<()>;

    /// Called once per logical peer, when its primary station is confirmed.
    fn notify_associated(&self, peer: &LogicalPeerInfo);

    /// Called when a registered logical peer is gone.
    fn notify_disconnected(&self, mld_mac: MacAddress);
}

/// Peer assembler configuration.
#[derive(Debug, Clone)]
pub struct PeerAssemblerConfig {
    /// Size of the logical peer id pool.
    pub max_ml_peers: u16,
}

impl Default for PeerAssemblerConfig {
    fn default() -> Self {
        Self::from(&MloConfig::default())
    }
}

impl From<&MloConfig> for PeerAssemblerConfig {
    fn from(config: &MloConfig) -> Self {
        Self {
            max_ml_peers: config.pools.max_ml_peers,
        }
    }
}

/// Where a logical peer's AID came from.
#[derive(Debug)]
enum AidSource {
    /// Group-wide pool, held by the logical peer itself.
    Shared(Arc<SharedIdPool>),
    /// Legacy pool of the primary link, held by the primary station.
    Link,
}

#[derive(Debug)]
struct LogicalPeer {
    logical_id: LogicalPeerId,
    mld: MldId,
    mld_mac: MacAddress,
    aid: Aid,
    aid_source: AidSource,
    primary_link: LinkId,
    constituents: BTreeMap<LinkId, Constituent>,
    partner_link_info: Vec<PartnerLinkInfo>,
    registered: bool,
}

impl LogicalPeer {
    fn info(&self) -> LogicalPeerInfo {
        LogicalPeerInfo {
            logical_id: self.logical_id,
            mld: self.mld,
            mld_mac: self.mld_mac,
            aid: self.aid,
            primary_link: self.primary_link,
            constituents: self.constituents.values().copied().collect(),
            partner_link_info: self.partner_link_info.clone(),
            registered: self.registered,
        }
    }

    fn key(&self, link_id: LinkId) -> LinkKey {
        LinkKey::new(self.mld, link_id)
    }
}

#[derive(Debug, Default)]
struct AssemblerState {
    peers: HashMap<LogicalPeerId, LogicalPeer>,
    by_mld_mac: HashMap<MacAddress, LogicalPeerId>,
}

/// Builds and tears down multi-link logical peers.
pub struct PeerAssembler {
    groups: Arc<GroupCoordinator>,
    logical_ids: SharedIdPool,
    callbacks: Arc<dyn PeerAssemblerCallbacks>,
    state: Mutex<AssemblerState>,
    stats: Mutex<PeerAssemblerStats>,
}

impl std::fmt::Debug for PeerAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAssembler")
            .field("logical_ids", &self.logical_ids)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl PeerAssembler {
    pub fn new(
        config: PeerAssemblerConfig,
        groups: Arc<GroupCoordinator>,
        callbacks: Arc<dyn PeerAssemblerCallbacks>,
    ) -> Self {
        Self {
            groups,
            logical_ids: SharedIdPool::new(PoolKind::LogicalPeer, config.max_ml_peers as usize),
            callbacks,
            state: Mutex::new(AssemblerState::default()),
            stats: Mutex::new(PeerAssemblerStats::default()),
        }
    }

    pub fn stats(&self) -> PeerAssemblerStats {
        self.stats.lock().clone()
    }

    pub fn logical_ids(&self) -> &SharedIdPool {
        &self.logical_ids
    }

    fn acquire(&self, key: LinkKey) -> Result<LinkRef> {
        self.groups
            .links()
            .acquire(key)
            .ok_or(MloError::LinkNotFound(key))
    }

    // ============ Association ============

    /// Associates a remote device on its primary link and fans out to
    /// every partner link it declared.
    ///
    /// Partner failures are recorded in the handle and do not abort the
    /// association; stations already created on other links stay in
    /// place. Callers that need all-or-nothing must check
    /// [`has_full_quorum`](Self::has_full_quorum) and delete otherwise.
    pub fn associate_primary(&self, link: LinkKey, payload: &AssocPayload) -> Result<LogicalPeerHandle> {
        let result = self.try_associate(link, payload);
        let mut stats = self.stats.lock();
        match &result {
            Ok(_) => stats.associations = stats.associations.saturating_add(1),
            Err(e) => {
                stats.association_failures = stats.association_failures.saturating_add(1);
                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, "PeerAssembler", "associate_primary")
                        .with_object_id(link.to_string())
                        .with_object_type("logical_peer")
                        .with_error(e.to_string())
                );
            }
        }
        result
    }

    fn try_associate(&self, link: LinkKey, payload: &AssocPayload) -> Result<LogicalPeerHandle> {
        let primary = self.acquire(link)?;
        let parsed = self.callbacks.parse_and_validate(link, payload)?;
        if !parsed.sta_mac.is_valid_station() {
            return Err(MloError::InvalidAssociation(format!(
                "station address {} is not unicast",
                parsed.sta_mac
            )));
        }
        let mld_mac = parsed.mld_mac.unwrap_or(parsed.sta_mac);

        let mut state = self.state.lock();
        if state.by_mld_mac.contains_key(&mld_mac) {
            return Err(MloError::PeerExists(mld_mac));
        }

        let logical_id = self.logical_ids.allocate()?;
        let (aid, aid_source) = match self.allocate_aid(&primary) {
            Ok(allocated) => allocated,
            Err(e) => {
                self.logical_ids.release(logical_id);
                return Err(e);
            }
        };

        let station = StationPeer::new(parsed.sta_mac, aid, link.link, parsed.capabilities)
            .with_logical_id(logical_id);
        if let Err(e) = primary.lock().insert_peer(station) {
            self.release_ids(&primary, &aid_source, aid, logical_id);
            return Err(e);
        }
        let primary_pending = match self.callbacks.add_peer(link, parsed.sta_mac, aid) {
            Ok(pending) => pending,
            Err(e) => {
                if matches!(e, MloError::HardwareRejected { .. }) {
                    self.bump_hardware_rejections();
                }
                primary.lock().remove_peer(&parsed.sta_mac);
                self.release_ids(&primary, &aid_source, aid, logical_id);
                return Err(e);
            }
        };

        let mut peer = LogicalPeer {
            logical_id,
            mld: link.mld,
            mld_mac,
            aid,
            aid_source,
            primary_link: link.link,
            constituents: BTreeMap::new(),
            partner_link_info: parsed.partners.clone(),
            registered: false,
        };
        peer.constituents.insert(
            link.link,
            Constituent {
                link_id: link.link,
                mac: parsed.sta_mac,
                state: StationState::Pending,
            },
        );

        let mut pending = vec![primary_pending];
        let mut partners = Vec::with_capacity(parsed.partners.len());
        for partner in &parsed.partners {
            let error = match self.add_partner(&mut peer, payload, partner) {
                Ok(partner_pending) => {
                    pending.push(partner_pending);
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        logical_id,
                        primary = %link,
                        partner = %partner.link_id,
                        error = %e,
                        "partner link association failed"
                    );
                    Some(e)
                }
            };
            partners.push(PartnerOutcome {
                link_id: partner.link_id,
                link_mac: partner.link_mac,
                error,
            });
        }

        {
            let succeeded = partners.iter().filter(|p| p.is_success()).count() as u64;
            let mut stats = self.stats.lock();
            stats.partner_successes = stats.partner_successes.saturating_add(succeeded);
            stats.partner_failures = stats
                .partner_failures
                .saturating_add(partners.len() as u64 - succeeded);
        }

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "PeerAssembler", "associate_primary")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(logical_id.to_string())
                .with_object_type("logical_peer")
                .with_details(serde_json::json!({
                    "primary": link.to_string(),
                    "mld_mac": mld_mac.to_string(),
                    "aid": aid,
                    "declared_partners": partners.len(),
                    "constituents": peer.constituents.len(),
                }))
        );

        state.by_mld_mac.insert(mld_mac, logical_id);
        state.peers.insert(logical_id, peer);

        Ok(LogicalPeerHandle {
            logical_id,
            aid,
            mld_mac,
            primary: link,
            partners,
            pending,
        })
    }

    fn allocate_aid(&self, primary: &LinkRef) -> Result<(Aid, AidSource)> {
        match self.groups.admission_aid_pool(primary.key().mld)? {
            Some(pool) => {
                let aid = pool.allocate()?;
                Ok((aid, AidSource::Shared(pool)))
            }
            None => {
                // Partner stations of other links' peers may hold AIDs this
                // link's pool still lists as free.
                let mut session = primary.lock();
                let mut skipped = Vec::new();
                let allocated = loop {
                    match session.aid_pool_mut().allocate() {
                        Ok(aid) if session.aid_in_use(aid) => skipped.push(aid),
                        other => break other,
                    }
                };
                for aid in skipped {
                    session.aid_pool_mut().release(aid);
                }
                Ok((allocated?, AidSource::Link))
            }
        }
    }

    fn release_ids(&self, primary: &LinkRef, source: &AidSource, aid: Aid, logical_id: LogicalPeerId) {
        match source {
            AidSource::Shared(pool) => pool.release(aid),
            AidSource::Link => primary.lock().aid_pool_mut().release(aid),
        }
        self.logical_ids.release(logical_id);
    }

    /// Creates the station for one partner link, reusing the primary AID.
    fn add_partner(
        &self,
        peer: &mut LogicalPeer,
        payload: &AssocPayload,
        partner: &PartnerLinkInfo,
    ) -> Result<PendingPeerAdd> {
        let key = peer.key(partner.link_id);
        if partner.link_id == peer.primary_link {
            return Err(MloError::InvalidAssociation(format!(
                "partner repeats primary link {}",
                key
            )));
        }
        if peer.constituents.contains_key(&partner.link_id) {
            return Err(MloError::InvalidAssociation(format!(
                "partner link {} declared twice",
                key
            )));
        }

        let link = self.acquire(key)?;
        let retargeted = self
            .callbacks
            .retarget_payload(payload, key, partner.link_mac)?;
        let parsed = self.callbacks.parse_and_validate(key, &retargeted)?;
        if parsed.sta_mac != partner.link_mac {
            return Err(MloError::PayloadRetargetFailed {
                link: key,
                reason: format!(
                    "retargeted address {} does not match declared {}",
                    parsed.sta_mac, partner.link_mac
                ),
            });
        }

        let station = StationPeer::new(parsed.sta_mac, peer.aid, partner.link_id, parsed.capabilities)
            .with_logical_id(peer.logical_id);
        {
            let mut session = link.lock();
            if session.aid_in_use(peer.aid) {
                return Err(MloError::InvalidAssociation(format!(
                    "aid {} already held by another station on {}",
                    peer.aid, key
                )));
            }
            session.insert_peer(station)?;
        }

        let pending = match self.callbacks.add_peer(key, parsed.sta_mac, peer.aid) {
            Ok(pending) => pending,
            Err(e) => {
                if matches!(e, MloError::HardwareRejected { .. }) {
                    self.bump_hardware_rejections();
                }
                link.lock().remove_peer(&parsed.sta_mac);
                return Err(e);
            }
        };

        peer.constituents.insert(
            partner.link_id,
            Constituent {
                link_id: partner.link_id,
                mac: parsed.sta_mac,
                state: StationState::Pending,
            },
        );
        Ok(pending)
    }

    fn bump_hardware_rejections(&self) {
        let mut stats = self.stats.lock();
        stats.hardware_rejections = stats.hardware_rejections.saturating_add(1);
    }

    // ============ Hardware completion ============

    /// Single entry point for hardware verdicts on station adds.
    pub fn on_peer_add_complete(&self, completion: PeerAddCompletion) -> CompletionOutcome {
        let mut notify = None;
        let mut disconnected = None;
        let outcome = {
            let mut state = self.state.lock();
            let outcome =
                self.apply_completion(&mut state, &completion, &mut notify, &mut disconnected);
            if outcome == CompletionOutcome::Stale {
                let mut stats = self.stats.lock();
                stats.stale_completions = stats.stale_completions.saturating_add(1);
                tracing::debug!(
                    link = %completion.link,
                    mac = %completion.mac,
                    "ignoring completion for vanished station"
                );
            }
            outcome
        };

        if let Some(info) = notify {
            self.callbacks.notify_associated(&info);
        }
        if let Some(mld_mac) = disconnected {
            self.callbacks.notify_disconnected(mld_mac);
        }
        outcome
    }

    fn apply_completion(
        &self,
        state: &mut AssemblerState,
        completion: &PeerAddCompletion,
        notify: &mut Option<LogicalPeerInfo>,
        disconnected: &mut Option<MacAddress>,
    ) -> CompletionOutcome {
        let Some(link) = self.groups.links().acquire(completion.link) else {
            return CompletionOutcome::Stale;
        };
        let Some(logical_id) = link
            .lock()
            .peer(&completion.mac)
            .and_then(|station| station.logical_id)
        else {
            return CompletionOutcome::Stale;
        };
        let Some(peer) = state.peers.get_mut(&logical_id) else {
            return CompletionOutcome::Stale;
        };
        let link_id = completion.link.link;
        match peer.constituents.get(&link_id) {
            Some(c) if c.mac == completion.mac && c.state == StationState::Pending => {}
            _ => return CompletionOutcome::Stale,
        }
        let is_primary = link_id == peer.primary_link;

        match &completion.result {
            Ok(()) => {
                if link.lock().activate_peer(&completion.mac).is_err() {
                    return CompletionOutcome::Stale;
                }
                if let Some(c) = peer.constituents.get_mut(&link_id) {
                    c.state = StationState::Active;
                }
                {
                    let mut stats = self.stats.lock();
                    stats.confirmations = stats.confirmations.saturating_add(1);
                }

                let registered = is_primary && !peer.registered;
                if registered {
                    peer.registered = true;
                    *notify = Some(peer.info());
                    audit_log!(
                        AuditRecord::new(AuditCategory::HardwareOperation, "PeerAssembler", "register_logical_peer")
                            .with_outcome(AuditOutcome::Success)
                            .with_object_id(logical_id.to_string())
                            .with_object_type("logical_peer")
                            .with_details(serde_json::json!({
                                "mld_mac": peer.mld_mac.to_string(),
                                "constituents": peer.constituents.len(),
                            }))
                    );
                }
                CompletionOutcome::Confirmed {
                    logical_id,
                    registered,
                }
            }
            Err(reason) => {
                self.bump_hardware_rejections();
                drop(link);

                if is_primary {
                    // Primary never made it into hardware; unwind everything.
                    if let Some(peer) = state.peers.remove(&logical_id) {
                        state.by_mld_mac.remove(&peer.mld_mac);
                        self.teardown(peer, Some(link_id));
                    }
                    audit_log!(
                        AuditRecord::new(AuditCategory::HardwareOperation, "PeerAssembler", "abort_association")
                            .with_object_id(logical_id.to_string())
                            .with_object_type("logical_peer")
                            .with_error(reason.clone())
                    );
                    CompletionOutcome::Aborted { logical_id }
                } else {
                    peer.constituents.remove(&link_id);
                    let remaining = peer.constituents.len();
                    if let Some(link) = self.groups.links().acquire(completion.link) {
                        link.lock().remove_peer(&completion.mac);
                    }
                    audit_log!(
                        AuditRecord::new(AuditCategory::HardwareOperation, "PeerAssembler", "partner_rejected")
                            .with_object_id(logical_id.to_string())
                            .with_object_type("logical_peer")
                            .with_details(serde_json::json!({
                                "link": completion.link.to_string(),
                                "remaining": remaining,
                            }))
                            .with_error(reason.clone())
                    );

                    // The primary may already have left; the peer goes with
                    // its last station.
                    if remaining == 0 {
                        *disconnected = self.destroy_empty(state, logical_id);
                        return CompletionOutcome::Aborted { logical_id };
                    }
                    CompletionOutcome::Degraded {
                        logical_id,
                        link_id,
                    }
                }
            }
        }
    }

    // ============ Teardown ============

    /// Deletes every station of a logical peer, then releases its ids.
    pub fn delete_logical_peer(&self, logical_id: LogicalPeerId) -> Result<()> {
        let disconnected = {
            let mut state = self.state.lock();
            let peer = state
                .peers
                .remove(&logical_id)
                .ok_or(MloError::PeerNotFound(logical_id))?;
            state.by_mld_mac.remove(&peer.mld_mac);
            let registered = peer.registered.then_some(peer.mld_mac);
            self.teardown(peer, None);
            registered
        };

        if let Some(mld_mac) = disconnected {
            self.callbacks.notify_disconnected(mld_mac);
        }
        Ok(())
    }

    /// Removes one station, e.g. after it left a single link. The logical
    /// peer goes away with its last constituent; its id is returned then.
    pub fn remove_station(&self, link: LinkKey, mac: MacAddress) -> Result<Option<LogicalPeerId>> {
        let session = self.acquire(link)?;
        let station = session
            .lock()
            .peer(&mac)
            .cloned()
            .ok_or(MloError::StationNotFound { link, mac })?;

        let mut state = self.state.lock();
        if let Err(e) = self.callbacks.del_peer(link, mac) {
            tracing::warn!(%link, %mac, error = %e, "hardware peer delete failed");
        }
        session.lock().remove_peer(&mac);

        let Some(logical_id) = station.logical_id else {
            session.lock().aid_pool_mut().release(station.aid);
            return Ok(None);
        };
        let Some(peer) = state.peers.get_mut(&logical_id) else {
            return Ok(None);
        };
        peer.constituents.remove(&link.link);
        if link.link == peer.primary_link && matches!(peer.aid_source, AidSource::Link) {
            session.lock().aid_pool_mut().release(peer.aid);
        }
        drop(session);

        if !peer.constituents.is_empty() {
            tracing::info!(logical_id, %link, remaining = peer.constituents.len(), "station left logical peer");
            return Ok(None);
        }

        let disconnected = self.destroy_empty(&mut state, logical_id);
        drop(state);
        if let Some(mld_mac) = disconnected {
            self.callbacks.notify_disconnected(mld_mac);
        }
        Ok(Some(logical_id))
    }

    /// Drops every constituent that lives on a detached link. No hardware
    /// calls are made; the link is already gone. Returns the number of
    /// stations dropped.
    pub fn purge_link(&self, link: &LinkRef) -> usize {
        let key = link.key();
        let stations: Vec<StationPeer> = {
            let mut session = link.lock();
            let stations: Vec<StationPeer> = session.peers().cloned().collect();
            for station in &stations {
                session.remove_peer(&station.mac);
                if station.logical_id.is_none() {
                    session.aid_pool_mut().release(station.aid);
                }
            }
            stations
        };

        let mut disconnected = Vec::new();
        {
            let mut state = self.state.lock();
            for logical_id in stations.iter().filter_map(|s| s.logical_id) {
                let Some(peer) = state.peers.get_mut(&logical_id) else {
                    continue;
                };
                peer.constituents.remove(&key.link);
                if peer.constituents.is_empty() {
                    disconnected.extend(self.destroy_empty(&mut state, logical_id));
                }
            }
        }

        for mld_mac in disconnected {
            self.callbacks.notify_disconnected(mld_mac);
        }

        if !stations.is_empty() {
            tracing::info!(link = %key, stations = stations.len(), "purged stations of detached link");
        }
        stations.len()
    }

    /// Removes a logical peer with no constituents left. Returns its MLD
    /// address if the upper layer must be told.
    fn destroy_empty(&self, state: &mut AssemblerState, logical_id: LogicalPeerId) -> Option<MacAddress> {
        let peer = state.peers.remove(&logical_id)?;
        state.by_mld_mac.remove(&peer.mld_mac);
        let registered = peer.registered.then_some(peer.mld_mac);
        self.teardown(peer, None);
        registered
    }

    /// Deletes remaining stations and releases ids. `skip_hw` names a link
    /// whose station never reached hardware.
    fn teardown(&self, peer: LogicalPeer, skip_hw: Option<LinkId>) {
        for constituent in peer.constituents.values() {
            let key = peer.key(constituent.link_id);
            let Some(link) = self.groups.links().acquire(key) else {
                continue;
            };
            if skip_hw != Some(constituent.link_id) {
                if let Err(e) = self.callbacks.del_peer(key, constituent.mac) {
                    tracing::warn!(link = %key, mac = %constituent.mac, error = %e, "hardware peer delete failed");
                }
            }
            let mut session = link.lock();
            session.remove_peer(&constituent.mac);
            if constituent.link_id == peer.primary_link && matches!(peer.aid_source, AidSource::Link) {
                session.aid_pool_mut().release(peer.aid);
            }
        }

        release_shared_aid(&peer.aid_source, peer.aid);
        self.logical_ids.release(peer.logical_id);
        {
            let mut stats = self.stats.lock();
            stats.teardowns = stats.teardowns.saturating_add(1);
        }

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "PeerAssembler", "delete_logical_peer")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(peer.logical_id.to_string())
                .with_object_type("logical_peer")
                .with_details(serde_json::json!({
                    "mld_mac": peer.mld_mac.to_string(),
                    "constituents": peer.constituents.len(),
                }))
        );
    }

    // ============ Queries ============

    pub fn logical_peer(&self, logical_id: LogicalPeerId) -> Option<LogicalPeerInfo> {
        self.state.lock().peers.get(&logical_id).map(LogicalPeer::info)
    }

    pub fn find_by_mld_mac(&self, mld_mac: &MacAddress) -> Option<LogicalPeerInfo> {
        let state = self.state.lock();
        let id = state.by_mld_mac.get(mld_mac)?;
        state.peers.get(id).map(LogicalPeer::info)
    }

    pub fn logical_peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn has_full_quorum(&self, logical_id: LogicalPeerId) -> Result<bool> {
        self.logical_peer(logical_id)
            .map(|info| info.has_full_quorum())
            .ok_or(MloError::PeerNotFound(logical_id))
    }
}

fn release_shared_aid(source: &AidSource, aid: Aid) {
    if let AidSource::Shared(pool) = source {
        pool.release(aid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupCoordinatorConfig;
    use crate::link::LinkRegistry;
    use crate::peer::{pending_peer_add, PeerAddResponder};
    use pretty_assertions::assert_eq;

    /// Records hardware calls; payloads are JSON `ParsedAssociation`s.
    #[derive(Default)]
    struct MockCallbacks {
        responders: Mutex<Vec<PeerAddResponder>>,
        deleted: Mutex<Vec<(LinkKey, MacAddress)>>,
        associated: Mutex<Vec<LogicalPeerId>>,
        disconnected: Mutex<Vec<MacAddress>>,
        reject_add_on: Mutex<Option<LinkId>>,
    }

    impl MockCallbacks {
        fn confirm_all(&self, assembler: &PeerAssembler) -> Vec<CompletionOutcome> {
            let responders: Vec<_> = self.responders.lock().drain(..).collect();
            responders
                .into_iter()
                .map(|r| assembler.on_peer_add_complete(PeerAddCompletion::confirmed(r.link(), r.mac())))
                .collect()
        }
    }

    impl PeerAssemblerCallbacks for MockCallbacks {
        fn parse_and_validate(&self, _link: LinkKey, payload: &AssocPayload) -> Result<ParsedAssociation> {
            serde_json::from_slice(payload.as_bytes())
                .map_err(|e| MloError::InvalidAssociation(e.to_string()))
        }

        fn retarget_payload(
            &self,
            payload: &AssocPayload,
            _link: LinkKey,
            link_mac: MacAddress,
        ) -> Result<AssocPayload> {
            let mut parsed: ParsedAssociation = serde_json::from_slice(payload.as_bytes())
                .map_err(|e| MloError::InvalidAssociation(e.to_string()))?;
            parsed.sta_mac = link_mac;
            parsed.partners.clear();
            Ok(AssocPayload(serde_json::to_vec(&parsed).unwrap()))
        }

        fn add_peer(&self, link: LinkKey, mac: MacAddress, _aid: Aid) -> Result<PendingPeerAdd> {
            if *self.reject_add_on.lock() == Some(link.link) {
                return Err(MloError::HardwareRejected {
                    link,
                    reason: "table full".to_string(),
                });
            }
            let (responder, pending) = pending_peer_add(link, mac);
            self.responders.lock().push(responder);
            Ok(pending)
        }

        fn del_peer(&self, link: LinkKey, mac: MacAddress) -> Result<()> {
            self.deleted.lock().push((link, mac));
            Ok(())
        }

        fn notify_associated(&self, peer: &LogicalPeerInfo) {
            self.associated.lock().push(peer.logical_id);
        }

        fn notify_disconnected(&self, mld_mac: MacAddress) {
            self.disconnected.lock().push(mld_mac);
        }
    }

    const MLD: MldId = MldId(1);

    fn lid(id: u8) -> LinkId {
        LinkId::new(id).unwrap()
    }

    fn key(id: u8) -> LinkKey {
        LinkKey::new(MLD, lid(id))
    }

    fn mac(a: u8, b: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, a, b])
    }

    fn payload(sta: MacAddress, partners: &[(u8, MacAddress)]) -> AssocPayload {
        let parsed = ParsedAssociation {
            sta_mac: sta,
            mld_mac: Some(mac(0xee, sta.as_bytes()[5])),
            capabilities: Default::default(),
            partners: partners
                .iter()
                .map(|(id, m)| PartnerLinkInfo {
                    link_id: lid(*id),
                    link_mac: *m,
                })
                .collect(),
        };
        AssocPayload(serde_json::to_vec(&parsed).unwrap())
    }

    /// Group of `links` links, all attached.
    fn setup(links: u8) -> (PeerAssembler, Arc<GroupCoordinator>, Arc<MockCallbacks>) {
        let coord = Arc::new(GroupCoordinator::new(
            GroupCoordinatorConfig {
                max_links_per_group: 3,
                max_aid: 8,
            },
            Arc::new(LinkRegistry::new()),
        ));
        coord.create_group(MLD, mac(0xff, 0)).unwrap();
        for id in 0..links {
            coord
                .attach_link(MLD, lid(id), mac(0xaa, id), Some(links as usize))
                .unwrap();
        }
        let callbacks = Arc::new(MockCallbacks::default());
        let assembler = PeerAssembler::new(
            PeerAssemblerConfig { max_ml_peers: 4 },
            coord.clone(),
            callbacks.clone(),
        );
        (assembler, coord, callbacks)
    }

    fn station(coord: &GroupCoordinator, link: u8, sta: MacAddress) -> Option<StationPeer> {
        coord.links().acquire(key(link))?.lock().peer(&sta).cloned()
    }

    #[test]
    fn test_single_link_association() {
        let (assembler, coord, callbacks) = setup(1);
        let sta = mac(1, 1);
        let handle = assembler.associate_primary(key(0), &payload(sta, &[])).unwrap();

        assert_eq!(handle.aid, 1);
        assert_eq!(handle.constituent_links(), vec![lid(0)]);
        assert!(assembler.has_full_quorum(handle.logical_id).unwrap());
        // Single-link group draws from the link's own pool.
        let link = coord.links().acquire(key(0)).unwrap();
        assert_eq!(link.lock().aid_pool().in_use(), 1);
        drop(link);

        let outcomes = callbacks.confirm_all(&assembler);
        assert_eq!(
            outcomes,
            vec![CompletionOutcome::Confirmed {
                logical_id: handle.logical_id,
                registered: true
            }]
        );
        assert!(station(&coord, 0, sta).unwrap().is_active());
        assert_eq!(*callbacks.associated.lock(), vec![handle.logical_id]);
    }

    #[test]
    fn test_full_quorum_shares_aid() {
        let (assembler, coord, callbacks) = setup(3);
        let sta = mac(1, 1);
        let handle = assembler
            .associate_primary(key(0), &payload(sta, &[(1, mac(2, 1)), (2, mac(3, 1))]))
            .unwrap();

        assert_eq!(handle.failed_partners().count(), 0);
        assert_eq!(handle.pending.len(), 3);
        let info = assembler.logical_peer(handle.logical_id).unwrap();
        assert_eq!(info.constituents.len(), 3);
        assert!(info.has_full_quorum());
        for (link, sta) in [(0, sta), (1, mac(2, 1)), (2, mac(3, 1))] {
            assert_eq!(station(&coord, link, sta).unwrap().aid, handle.aid);
        }
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 1);

        callbacks.confirm_all(&assembler);
        assert_eq!(callbacks.associated.lock().len(), 1);
        assert_eq!(assembler.stats().confirmations, 3);
    }

    #[test]
    fn test_missing_partner_link_continues() {
        let (assembler, coord, _) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(2, mac(3, 1)), (1, mac(2, 1))]))
            .unwrap();

        let failed: Vec<_> = handle.failed_partners().collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0].error, Some(MloError::LinkNotFound(k)) if k == key(2)));
        // The partner after the failure was still attempted.
        assert_eq!(handle.constituent_links(), vec![lid(0), lid(1)]);
        assert!(station(&coord, 1, mac(2, 1)).is_some());
        assert!(!assembler.has_full_quorum(handle.logical_id).unwrap());
        assert_eq!(assembler.stats().partner_failures, 1);
    }

    #[test]
    fn test_primary_hw_rejection_aborts() {
        let (assembler, coord, callbacks) = setup(2);
        let sta = mac(1, 1);
        let handle = assembler
            .associate_primary(key(0), &payload(sta, &[(1, mac(2, 1))]))
            .unwrap();

        let outcome =
            assembler.on_peer_add_complete(PeerAddCompletion::rejected(key(0), sta, "firmware busy"));
        assert_eq!(outcome, CompletionOutcome::Aborted { logical_id: handle.logical_id });
        assert_eq!(assembler.logical_peer_count(), 0);
        assert!(station(&coord, 0, sta).is_none());
        assert!(station(&coord, 1, mac(2, 1)).is_none());
        // Only the partner reached hardware.
        assert_eq!(*callbacks.deleted.lock(), vec![(key(1), mac(2, 1))]);
        assert!(!assembler.logical_ids().is_allocated(handle.logical_id));
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 0);
        assert!(callbacks.associated.lock().is_empty());

        // The partner's late confirmation is stale.
        let outcome = assembler.on_peer_add_complete(PeerAddCompletion::confirmed(key(1), mac(2, 1)));
        assert_eq!(outcome, CompletionOutcome::Stale);
    }

    #[test]
    fn test_partner_hw_rejection_degrades() {
        let (assembler, coord, _) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();

        let outcome =
            assembler.on_peer_add_complete(PeerAddCompletion::rejected(key(1), mac(2, 1), "no room"));
        assert_eq!(
            outcome,
            CompletionOutcome::Degraded {
                logical_id: handle.logical_id,
                link_id: lid(1)
            }
        );
        assert!(station(&coord, 1, mac(2, 1)).is_none());
        let info = assembler.logical_peer(handle.logical_id).unwrap();
        assert_eq!(info.constituents.len(), 1);
        assert!(!info.has_full_quorum());
    }

    #[test]
    fn test_sync_partner_rejection_recorded() {
        let (assembler, coord, callbacks) = setup(2);
        *callbacks.reject_add_on.lock() = Some(lid(1));
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();
        assert!(matches!(
            handle.partners[0].error,
            Some(MloError::HardwareRejected { .. })
        ));
        assert!(station(&coord, 1, mac(2, 1)).is_none());
        assert_eq!(assembler.stats().hardware_rejections, 1);
    }

    #[test]
    fn test_sync_primary_rejection_releases_ids() {
        let (assembler, coord, callbacks) = setup(1);
        *callbacks.reject_add_on.lock() = Some(lid(0));
        let err = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[]))
            .unwrap_err();
        assert!(matches!(err, MloError::HardwareRejected { .. }));
        assert_eq!(assembler.logical_ids().in_use(), 0);
        let link = coord.links().acquire(key(0)).unwrap();
        assert_eq!(link.lock().aid_pool().in_use(), 0);
        assert_eq!(link.lock().peer_count(), 0);
    }

    #[test]
    fn test_duplicate_mld_rejected() {
        let (assembler, _, _) = setup(1);
        let body = payload(mac(1, 1), &[]);
        assembler.associate_primary(key(0), &body).unwrap();
        assert!(matches!(
            assembler.associate_primary(key(0), &body),
            Err(MloError::PeerExists(_))
        ));
        assert_eq!(assembler.stats().association_failures, 1);
    }

    #[test]
    fn test_logical_id_exhaustion() {
        let (assembler, _, _) = setup(1);
        for i in 0..4 {
            assembler
                .associate_primary(key(0), &payload(mac(1, i), &[]))
                .unwrap();
        }
        assert!(matches!(
            assembler.associate_primary(key(0), &payload(mac(1, 9), &[])),
            Err(MloError::PoolExhausted {
                pool: PoolKind::LogicalPeer
            })
        ));
    }

    #[test]
    fn test_delete_logical_peer() {
        let (assembler, coord, callbacks) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();
        callbacks.confirm_all(&assembler);

        assembler.delete_logical_peer(handle.logical_id).unwrap();
        assert!(station(&coord, 0, mac(1, 1)).is_none());
        assert!(station(&coord, 1, mac(2, 1)).is_none());
        assert_eq!(callbacks.deleted.lock().len(), 2);
        assert!(!assembler.logical_ids().is_allocated(handle.logical_id));
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 0);
        assert_eq!(*callbacks.disconnected.lock(), vec![handle.mld_mac]);
        assert!(matches!(
            assembler.delete_logical_peer(handle.logical_id),
            Err(MloError::PeerNotFound(_))
        ));
    }

    #[test]
    fn test_remove_station_last_one_destroys() {
        let (assembler, _, callbacks) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();

        assert_eq!(assembler.remove_station(key(1), mac(2, 1)).unwrap(), None);
        assert_eq!(assembler.logical_peer_count(), 1);
        assert_eq!(
            assembler.remove_station(key(0), mac(1, 1)).unwrap(),
            Some(handle.logical_id)
        );
        assert_eq!(assembler.logical_peer_count(), 0);
        // Never confirmed, so never announced.
        assert!(callbacks.disconnected.lock().is_empty());
    }

    #[test]
    fn test_purge_detached_link() {
        let (assembler, coord, callbacks) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();

        let detached = coord.detach_link(key(1)).unwrap();
        assert_eq!(assembler.purge_link(&detached), 1);
        assert_eq!(detached.lock().peer_count(), 0);
        assert!(callbacks.deleted.lock().is_empty());

        let info = assembler.logical_peer(handle.logical_id).unwrap();
        assert_eq!(info.constituents.len(), 1);
        assert!(assembler.find_by_mld_mac(&handle.mld_mac).is_some());
    }

    #[test]
    fn test_partner_rejection_after_primary_left_destroys_peer() {
        let (assembler, coord, callbacks) = setup(2);
        let sta = mac(1, 1);
        let body = payload(sta, &[(1, mac(2, 1))]);
        let handle = assembler.associate_primary(key(0), &body).unwrap();
        let primary = callbacks.responders.lock().remove(0);
        assembler.on_peer_add_complete(PeerAddCompletion::confirmed(primary.link(), primary.mac()));

        assert_eq!(assembler.remove_station(key(0), sta).unwrap(), None);
        let outcome =
            assembler.on_peer_add_complete(PeerAddCompletion::rejected(key(1), mac(2, 1), "no room"));
        assert_eq!(outcome, CompletionOutcome::Aborted { logical_id: handle.logical_id });

        assert_eq!(assembler.logical_peer_count(), 0);
        assert!(assembler.find_by_mld_mac(&handle.mld_mac).is_none());
        assert!(!assembler.logical_ids().is_allocated(handle.logical_id));
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 0);
        assert!(station(&coord, 1, mac(2, 1)).is_none());
        assert_eq!(*callbacks.disconnected.lock(), vec![handle.mld_mac]);

        assembler.associate_primary(key(0), &body).unwrap();
    }

    #[test]
    fn test_purge_of_last_link_destroys_peer() {
        let (assembler, coord, callbacks) = setup(2);
        let handle = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[(1, mac(2, 1))]))
            .unwrap();
        callbacks.confirm_all(&assembler);
        assert_eq!(assembler.remove_station(key(0), mac(1, 1)).unwrap(), None);

        let detached = coord.detach_link(key(1)).unwrap();
        assert_eq!(assembler.purge_link(&detached), 1);
        assert_eq!(assembler.logical_peer_count(), 0);
        assert!(!assembler.logical_ids().is_allocated(handle.logical_id));
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 0);
        assert_eq!(*callbacks.disconnected.lock(), vec![handle.mld_mac]);

        let again = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[]))
            .unwrap();
        assert_eq!(again.aid, handle.aid);
    }

    /// Group with no declared topology and only link 0 attached.
    fn setup_undeclared() -> (PeerAssembler, Arc<GroupCoordinator>) {
        let coord = Arc::new(GroupCoordinator::new(
            GroupCoordinatorConfig {
                max_links_per_group: 3,
                max_aid: 8,
            },
            Arc::new(LinkRegistry::new()),
        ));
        coord.create_group(MLD, mac(0xff, 0)).unwrap();
        coord.attach_link(MLD, lid(0), mac(0xaa, 0), None).unwrap();
        let assembler = PeerAssembler::new(
            PeerAssemblerConfig { max_ml_peers: 4 },
            coord.clone(),
            Arc::new(MockCallbacks::default()),
        );
        (assembler, coord)
    }

    #[test]
    fn test_sharing_mode_pinned_while_legacy_stations_held() {
        let (assembler, coord) = setup_undeclared();
        let legacy = assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[]))
            .unwrap();
        assert_eq!(legacy.aid, 1);

        coord.attach_link(MLD, lid(1), mac(0xaa, 1), None).unwrap();
        assert!(!coord.shares_ids(MLD).unwrap());

        // Link 1's own pool hands out 1 as well, which link 0 already uses.
        let handle = assembler
            .associate_primary(key(1), &payload(mac(3, 3), &[(0, mac(4, 3))]))
            .unwrap();
        assert_eq!(handle.aid, 1);
        assert!(matches!(
            handle.partners[0].error,
            Some(MloError::InvalidAssociation(_))
        ));
        assert!(station(&coord, 0, mac(4, 3)).is_none());
        assert_eq!(coord.links().acquire(key(0)).unwrap().lock().peer_count(), 1);
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 0);

        // Once the group is empty the topology decides again.
        assembler.delete_logical_peer(legacy.logical_id).unwrap();
        assembler.delete_logical_peer(handle.logical_id).unwrap();
        assert!(coord.shares_ids(MLD).unwrap());
        let shared = assembler
            .associate_primary(key(0), &payload(mac(1, 5), &[(1, mac(2, 5))]))
            .unwrap();
        assert_eq!(coord.group_aid_pool(MLD).unwrap().in_use(), 1);
        assert_eq!(shared.constituent_links(), vec![lid(0), lid(1)]);
    }

    #[test]
    fn test_legacy_allocation_skips_partner_aids() {
        let (assembler, coord) = setup_undeclared();
        assembler
            .associate_primary(key(0), &payload(mac(1, 1), &[]))
            .unwrap();
        coord.attach_link(MLD, lid(1), mac(0xaa, 1), None).unwrap();

        // Legacy AID 2 from link 0 now also sits on link 1.
        let spanning = assembler
            .associate_primary(key(0), &payload(mac(1, 2), &[(1, mac(2, 2))]))
            .unwrap();
        assert_eq!(spanning.aid, 2);
        assert_eq!(station(&coord, 1, mac(2, 2)).unwrap().aid, 2);

        let first = assembler
            .associate_primary(key(1), &payload(mac(1, 3), &[]))
            .unwrap();
        let second = assembler
            .associate_primary(key(1), &payload(mac(1, 4), &[]))
            .unwrap();
        assert_eq!(first.aid, 1);
        assert_eq!(second.aid, 3);
    }
}
