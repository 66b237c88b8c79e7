//! Link sessions and the link registry.
//!
//! # Architecture
//!
//! ```text
//! LinkRegistry (arena, keyed by LinkKey)
//!      │
//!      ├──> LinkEntry ── Mutex<LinkSession> ── local_peers, local AID pool
//!      └──> LinkEntry ── ...
//!
//! LinkRef = Arc<LinkEntry>  (liveness reference, dropped when done)
//! ```
//!
//! A link session is only ever driven from one execution context at a
//! time (its mutex), but other links' contexts may reach into it. They do
//! so through [`LinkRegistry::acquire`], which hands out a counted
//! [`LinkRef`] and refuses links that are detaching. A stale [`LinkKey`]
//! resolves to `None` instead of a dangling session.

mod registry;
mod session;
mod station;

pub use registry::{LinkRef, LinkRegistry};
pub use session::{LinkSession, LinkState};
pub use station::{PeerCapabilities, StationPeer, StationState};
