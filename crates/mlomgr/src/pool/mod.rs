//! Identifier pools.
//!
//! Two allocators back the coordinator:
//!
//! - [`AidFreeList`]: the legacy per-link association-id pool, an O(1)
//!   singly linked free list. It is owned by exactly one link session and
//!   is only touched from that link's context, so it carries no lock.
//! - [`SharedIdPool`]: a first-fit bitmap behind a mutex. Used for the
//!   global logical-peer ids and for group-wide shared AIDs, both of which
//!   are read and written from several link contexts.
//!
//! Both pools are sized at creation and never grow. Identifier `0` is
//! reserved as "invalid" in both.

mod bitmap;
mod freelist;

pub use bitmap::{IdBitmap, SharedIdPool};
pub use freelist::AidFreeList;

/// 802.11 association identifier.
pub type Aid = u16;

/// Logical (multi-link) peer identifier.
pub type LogicalPeerId = u16;

/// Highest AID a station may hold.
pub const MAX_AID: u16 = 2007;
