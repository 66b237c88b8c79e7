//! Group coordinator - MLD membership and the bring-up barrier.
//!
//! # Architecture
//!
//! ```text
//! link bring-up done ──> GroupCoordinator::link_bring_up_complete
//!                              │  (Starting -> SyncWait)
//!                              ▼
//!                        on_link_ready ──> count SyncWait/Up links with
//!                              │            a valid channel
//!                              ├── count < expected ──> Waiting
//!                              └── count == expected ─> every SyncWait
//!                                                       link -> Up
//! ```
//!
//! No link decides on its own to go up. The coordinator observes the
//! whole group and releases the cohort in one pass. Reads of other links'
//! state are taken one lock at a time and may be slightly stale; a link
//! that changes state mid-scan triggers a fresh evaluation itself.
//!
//! A link that detaches while others wait does not lower the expected
//! link count. The group keeps waiting until the missing link returns or
//! [`GroupCoordinator::reconfigure_expected_links`] is called.

mod coordinator;
mod types;

pub use coordinator::{GroupCoordinator, GroupCoordinatorCallbacks, GroupCoordinatorConfig};
pub use types::{BarrierOutcome, GroupCoordinatorStats, GroupInfo};
