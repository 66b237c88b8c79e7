//! Multi-link device coordinator.
//!
//! Coordinates the constituent links of 802.11be multi-link devices (MLDs):
//! identifier pools shared across links, the group bring-up barrier, and
//! the assembly of per-link station associations into one logical peer.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────> [GroupCoordinator] ── barrier, quiet bitmap
//! [MloDaemon] ────┤                      │
//!  (event loop)   │                      ↓
//!                 └──> [PeerAssembler] ─> [LinkRegistry] ─> [LinkSession]s
//!                            │                                  │
//!                            ↓                                  ↓
//!                    logical id pool                     legacy AID pool
//! ```
//!
//! # Key Components
//!
//! - [`pool`]: legacy AID free list and the locked bitmap pool
//! - [`link`]: link sessions and the registry that hands out counted references
//! - [`group::GroupCoordinator`]: group membership and the readiness barrier
//! - [`peer::PeerAssembler`]: logical peer creation, fan-out and teardown
//! - [`daemon::MloDaemon`]: event loop driving both over an mpsc queue

pub mod audit;
pub mod config;
pub mod daemon;
pub mod error;
pub mod group;
pub mod link;
pub mod peer;
pub mod pool;

pub use config::MloConfig;
pub use daemon::{MloDaemon, MloDaemonConfig, MloDaemonHandle, SimulatedDriver};
pub use error::{MloError, PoolKind, Result};
pub use group::{BarrierOutcome, GroupCoordinator};
pub use peer::{PeerAssembler, PeerAssemblerCallbacks};

pub use mlo_types::{LinkId, LinkKey, MacAddress, MldId};
