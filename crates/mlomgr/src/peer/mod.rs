//! Logical peer assembly.
//!
//! A remote multi-link device associates on one link (the primary) and
//! declares its other links (partners). The assembler creates one station
//! per link, all holding the same AID, and groups them under one logical
//! peer:
//!
//! ```text
//! associate_primary(link, payload)
//!   ├─ parse + validate            (callbacks)
//!   ├─ allocate logical id          (global bitmap pool)
//!   ├─ allocate AID                 (group shared pool or link free list)
//!   ├─ primary station ─> add_peer  (pending)
//!   └─ for each partner:
//!        resolve link ─> retarget ─> validate ─> station ─> add_peer
//!        (a failure is recorded and the loop continues)
//!
//! on_peer_add_complete(completion)
//!   ├─ confirmed: station active; primary confirmation notifies upstream
//!   ├─ primary rejected: whole association unwound
//!   └─ partner rejected: that link dropped, logical peer degraded
//! ```
//!
//! The logical id is released only when the last constituent station is
//! gone.

mod assembler;
mod pending;
mod types;

pub use assembler::{PeerAssembler, PeerAssemblerCallbacks, PeerAssemblerConfig};
pub use pending::{pending_peer_add, PeerAddResponder, PendingPeerAdd};
pub use types::{
    AssocPayload, CompletionOutcome, Constituent, LogicalPeerHandle, LogicalPeerInfo,
    ParsedAssociation, PartnerLinkInfo, PartnerOutcome, PeerAddCompletion, PeerAssemblerStats,
};
