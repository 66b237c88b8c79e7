//! MloDaemon implementation.
//!
//! The daemon owns the coordinator and the assembler and runs one event
//! loop over an mpsc queue. Every event is processed to completion
//! before the next one, so per-link events are naturally serialized.
//! Pending hardware confirmations are awaited in spawned tasks that post
//! [`MloEvent::PeerAddCompleted`] back into the same queue.

use std::sync::Arc;

use mlo_types::{LinkId, LinkKey, MacAddress, MldId};
use tokio::sync::{mpsc, oneshot};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::MloConfig;
use crate::error::{MloError, Result};
use crate::group::{
    BarrierOutcome, GroupCoordinator, GroupCoordinatorCallbacks, GroupCoordinatorConfig, GroupInfo,
};
use crate::peer::{
    AssocPayload, CompletionOutcome, LogicalPeerHandle, LogicalPeerInfo, PeerAddCompletion,
    PeerAssembler, PeerAssemblerCallbacks, PeerAssemblerConfig,
};
use crate::pool::LogicalPeerId;

type Reply<T> = oneshot::Sender<T>;

/// Events processed by the daemon loop.
#[derive(Debug)]
pub enum MloEvent {
    CreateGroup {
        mld: MldId,
        mld_mac: MacAddress,
        reply: Reply<Result<()>>,
    },
    DestroyGroup {
        mld: MldId,
        reply: Reply<Result<()>>,
    },
    AttachLink {
        mld: MldId,
        link_id: LinkId,
        link_mac: MacAddress,
        declared_link_count: Option<usize>,
        reply: Reply<Result<()>>,
    },
    /// Detaches the link and purges its stations; replies with the
    /// number of stations dropped.
    DetachLink {
        key: LinkKey,
        reply: Reply<Result<usize>>,
    },
    ReconfigureExpectedLinks {
        mld: MldId,
        expected: usize,
        reply: Reply<Result<BarrierOutcome>>,
    },
    StartLink {
        key: LinkKey,
        reply: Reply<Result<()>>,
    },
    LinkBringUpComplete {
        key: LinkKey,
        reply: Reply<Result<BarrierOutcome>>,
    },
    SetChannelValid {
        key: LinkKey,
        valid: bool,
        reply: Reply<Result<Option<BarrierOutcome>>>,
    },
    StopLink {
        key: LinkKey,
        reply: Reply<Result<()>>,
    },
    SetLinkQuiet {
        mld: MldId,
        link_id: LinkId,
        quiet: bool,
        reply: Reply<Result<u16>>,
    },
    Associate {
        link: LinkKey,
        payload: AssocPayload,
        reply: Reply<Result<LogicalPeerHandle>>,
    },
    /// Hardware verdict for one station add.
    PeerAddCompleted(PeerAddCompletion),
    DeleteLogicalPeer {
        logical_id: LogicalPeerId,
        reply: Reply<Result<()>>,
    },
    RemoveStation {
        link: LinkKey,
        mac: MacAddress,
        reply: Reply<Result<Option<LogicalPeerId>>>,
    },
    GetGroup {
        mld: MldId,
        reply: Reply<Option<GroupInfo>>,
    },
    GetLogicalPeer {
        logical_id: LogicalPeerId,
        reply: Reply<Option<LogicalPeerInfo>>,
    },
    Shutdown,
}

/// Configuration for the MloDaemon.
#[derive(Debug, Clone)]
pub struct MloDaemonConfig {
    pub event_queue_depth: usize,
    pub group: GroupCoordinatorConfig,
    pub assembler: PeerAssemblerConfig,
}

impl Default for MloDaemonConfig {
    fn default() -> Self {
        Self::from(&MloConfig::default())
    }
}

impl From<&MloConfig> for MloDaemonConfig {
    fn from(config: &MloConfig) -> Self {
        Self {
            event_queue_depth: config.daemon.event_queue_depth,
            group: GroupCoordinatorConfig::from(config),
            assembler: PeerAssemblerConfig::from(config),
        }
    }
}

/// The multi-link coordination daemon.
pub struct MloDaemon {
    groups: Arc<GroupCoordinator>,
    assembler: Arc<PeerAssembler>,
    tx: mpsc::Sender<MloEvent>,
    rx: mpsc::Receiver<MloEvent>,
}

impl MloDaemon {
    /// Creates a daemon driving `driver` for hardware and upper-layer
    /// notifications.
    pub fn new<D>(config: MloDaemonConfig, driver: Arc<D>) -> Self
    where
        D: PeerAssemblerCallbacks + GroupCoordinatorCallbacks + 'static,
    {
        let links = Arc::new(crate::link::LinkRegistry::new());
        let mut groups = GroupCoordinator::new(config.group, links);
        groups.set_callbacks(driver.clone());
        let groups = Arc::new(groups);
        let assembler = Arc::new(PeerAssembler::new(config.assembler, groups.clone(), driver));
        let (tx, rx) = mpsc::channel(config.event_queue_depth.max(1));

        Self {
            groups,
            assembler,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> MloDaemonHandle {
        MloDaemonHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn groups(&self) -> Arc<GroupCoordinator> {
        Arc::clone(&self.groups)
    }

    pub fn assembler(&self) -> Arc<PeerAssembler> {
        Arc::clone(&self.assembler)
    }

    /// Runs the event loop until [`MloEvent::Shutdown`] arrives.
    pub async fn run(mut self) {
        tracing::info!("Starting MloDaemon event loop");
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "MloDaemon", "event_loop_started")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "queue_depth": self.tx.max_capacity(),
                }))
        );

        while let Some(event) = self.rx.recv().await {
            if matches!(event, MloEvent::Shutdown) {
                break;
            }
            self.dispatch(event);
        }

        let groups = self.groups.stats();
        let peers = self.assembler.stats();
        tracing::info!("MloDaemon event loop stopped");
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "MloDaemon", "event_loop_stopped")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "groups_created": groups.groups_created,
                    "barrier_releases": groups.barrier_releases,
                    "associations": peers.associations,
                    "teardowns": peers.teardowns,
                }))
        );
    }

    fn dispatch(&self, event: MloEvent) {
        match event {
            MloEvent::CreateGroup {
                mld,
                mld_mac,
                reply,
            } => {
                let _ = reply.send(self.groups.create_group(mld, mld_mac));
            }
            MloEvent::DestroyGroup { mld, reply } => {
                let _ = reply.send(self.groups.destroy_group(mld));
            }
            MloEvent::AttachLink {
                mld,
                link_id,
                link_mac,
                declared_link_count,
                reply,
            } => {
                let result = self
                    .groups
                    .attach_link(mld, link_id, link_mac, declared_link_count)
                    .map(|_| ());
                let _ = reply.send(result);
            }
            MloEvent::DetachLink { key, reply } => {
                let result = self
                    .groups
                    .detach_link(key)
                    .map(|link| self.assembler.purge_link(&link));
                let _ = reply.send(result);
            }
            MloEvent::ReconfigureExpectedLinks {
                mld,
                expected,
                reply,
            } => {
                let _ = reply.send(self.groups.reconfigure_expected_links(mld, expected));
            }
            MloEvent::StartLink { key, reply } => {
                let _ = reply.send(self.groups.start_link(key));
            }
            MloEvent::LinkBringUpComplete { key, reply } => {
                let _ = reply.send(self.groups.link_bring_up_complete(key));
            }
            MloEvent::SetChannelValid { key, valid, reply } => {
                let _ = reply.send(self.groups.set_channel_valid(key, valid));
            }
            MloEvent::StopLink { key, reply } => {
                let _ = reply.send(self.groups.stop_link(key));
            }
            MloEvent::SetLinkQuiet {
                mld,
                link_id,
                quiet,
                reply,
            } => {
                let _ = reply.send(self.groups.set_link_quiet(mld, link_id, quiet));
            }
            MloEvent::Associate {
                link,
                payload,
                reply,
            } => {
                let result = self.assembler.associate_primary(link, &payload).map(|mut handle| {
                    for pending in handle.take_pending() {
                        let tx = self.tx.clone();
                        tokio::spawn(async move {
                            let completion = pending.wait().await;
                            if tx.send(MloEvent::PeerAddCompleted(completion)).await.is_err() {
                                tracing::debug!("daemon gone before peer add completed");
                            }
                        });
                    }
                    handle
                });
                let _ = reply.send(result);
            }
            MloEvent::PeerAddCompleted(completion) => {
                let link = completion.link;
                let mac = completion.mac;
                match self.assembler.on_peer_add_complete(completion) {
                    CompletionOutcome::Stale => {}
                    outcome => tracing::debug!(%link, %mac, ?outcome, "peer add completed"),
                }
            }
            MloEvent::DeleteLogicalPeer { logical_id, reply } => {
                let _ = reply.send(self.assembler.delete_logical_peer(logical_id));
            }
            MloEvent::RemoveStation { link, mac, reply } => {
                let _ = reply.send(self.assembler.remove_station(link, mac));
            }
            MloEvent::GetGroup { mld, reply } => {
                let _ = reply.send(self.groups.group_info(mld));
            }
            MloEvent::GetLogicalPeer { logical_id, reply } => {
                let _ = reply.send(self.assembler.logical_peer(logical_id));
            }
            MloEvent::Shutdown => {}
        }
    }
}

/// Cloneable request interface to a running [`MloDaemon`].
#[derive(Debug, Clone)]
pub struct MloDaemonHandle {
    tx: mpsc::Sender<MloEvent>,
}

impl MloDaemonHandle {
    async fn request<T>(&self, event: impl FnOnce(Reply<T>) -> MloEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(event(reply))
            .await
            .map_err(|_| MloError::ChannelClosed)?;
        rx.await.map_err(|_| MloError::ChannelClosed)
    }

    pub async fn create_group(&self, mld: MldId, mld_mac: MacAddress) -> Result<()> {
        self.request(|reply| MloEvent::CreateGroup {
            mld,
            mld_mac,
            reply,
        })
        .await?
    }

    pub async fn destroy_group(&self, mld: MldId) -> Result<()> {
        self.request(|reply| MloEvent::DestroyGroup { mld, reply })
            .await?
    }

    pub async fn attach_link(
        &self,
        mld: MldId,
        link_id: LinkId,
        link_mac: MacAddress,
        declared_link_count: Option<usize>,
    ) -> Result<()> {
        self.request(|reply| MloEvent::AttachLink {
            mld,
            link_id,
            link_mac,
            declared_link_count,
            reply,
        })
        .await?
    }

    pub async fn detach_link(&self, key: LinkKey) -> Result<usize> {
        self.request(|reply| MloEvent::DetachLink { key, reply })
            .await?
    }

    pub async fn reconfigure_expected_links(&self, mld: MldId, expected: usize) -> Result<BarrierOutcome> {
        self.request(|reply| MloEvent::ReconfigureExpectedLinks {
            mld,
            expected,
            reply,
        })
        .await?
    }

    pub async fn start_link(&self, key: LinkKey) -> Result<()> {
        self.request(|reply| MloEvent::StartLink { key, reply }).await?
    }

    pub async fn link_bring_up_complete(&self, key: LinkKey) -> Result<BarrierOutcome> {
        self.request(|reply| MloEvent::LinkBringUpComplete { key, reply })
            .await?
    }

    pub async fn set_channel_valid(&self, key: LinkKey, valid: bool) -> Result<Option<BarrierOutcome>> {
        self.request(|reply| MloEvent::SetChannelValid { key, valid, reply })
            .await?
    }

    pub async fn stop_link(&self, key: LinkKey) -> Result<()> {
        self.request(|reply| MloEvent::StopLink { key, reply }).await?
    }

    pub async fn set_link_quiet(&self, mld: MldId, link_id: LinkId, quiet: bool) -> Result<u16> {
        self.request(|reply| MloEvent::SetLinkQuiet {
            mld,
            link_id,
            quiet,
            reply,
        })
        .await?
    }

    /// Associates a station. The returned handle's pending list is empty;
    /// confirmations are consumed by the daemon.
    pub async fn associate(&self, link: LinkKey, payload: AssocPayload) -> Result<LogicalPeerHandle> {
        self.request(|reply| MloEvent::Associate {
            link,
            payload,
            reply,
        })
        .await?
    }

    /// Posts a hardware verdict from an external driver.
    pub async fn peer_add_completed(&self, completion: PeerAddCompletion) -> Result<()> {
        self.tx
            .send(MloEvent::PeerAddCompleted(completion))
            .await
            .map_err(|_| MloError::ChannelClosed)
    }

    pub async fn delete_logical_peer(&self, logical_id: LogicalPeerId) -> Result<()> {
        self.request(|reply| MloEvent::DeleteLogicalPeer { logical_id, reply })
            .await?
    }

    pub async fn remove_station(&self, link: LinkKey, mac: MacAddress) -> Result<Option<LogicalPeerId>> {
        self.request(|reply| MloEvent::RemoveStation { link, mac, reply })
            .await?
    }

    pub async fn group(&self, mld: MldId) -> Result<Option<GroupInfo>> {
        self.request(|reply| MloEvent::GetGroup { mld, reply }).await
    }

    pub async fn logical_peer(&self, logical_id: LogicalPeerId) -> Result<Option<LogicalPeerInfo>> {
        self.request(|reply| MloEvent::GetLogicalPeer { logical_id, reply })
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(MloEvent::Shutdown)
            .await
            .map_err(|_| MloError::ChannelClosed)
    }
}
