//! Arena of link sessions keyed by [`LinkKey`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mlo_types::{LinkKey, MldId};
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::session::LinkSession;
use crate::error::{MloError, Result};

#[derive(Debug)]
struct LinkEntry {
    key: LinkKey,
    session: Mutex<LinkSession>,
    detaching: AtomicBool,
}

/// Counted reference to a live link session.
///
/// Holding a `LinkRef` keeps the session allocated even if the link
/// detaches concurrently; the holder can observe that through
/// [`LinkRef::is_detaching`]. Dropping the reference releases it.
#[derive(Debug, Clone)]
pub struct LinkRef(Arc<LinkEntry>);

impl LinkRef {
    pub fn key(&self) -> LinkKey {
        self.0.key
    }

    /// Locks the session for the duration of one event.
    pub fn lock(&self) -> MutexGuard<'_, LinkSession> {
        self.0.session.lock()
    }

    pub fn is_detaching(&self) -> bool {
        self.0.detaching.load(Ordering::Acquire)
    }
}

/// Registry of all attached link sessions.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: RwLock<HashMap<LinkKey, Arc<LinkEntry>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns the first reference to it.
    pub fn insert(&self, session: LinkSession) -> Result<LinkRef> {
        let key = session.key();
        let mut links = self.links.write();
        if links.contains_key(&key) {
            return Err(MloError::DuplicateLink(key));
        }
        let entry = Arc::new(LinkEntry {
            key,
            session: Mutex::new(session),
            detaching: AtomicBool::new(false),
        });
        links.insert(key, Arc::clone(&entry));
        Ok(LinkRef(entry))
    }

    /// Acquires a reference to a live link.
    ///
    /// Returns `None` if the link never attached, has detached, or is in
    /// the middle of detaching.
    pub fn acquire(&self, key: LinkKey) -> Option<LinkRef> {
        let links = self.links.read();
        let entry = links.get(&key)?;
        if entry.detaching.load(Ordering::Acquire) {
            return None;
        }
        Some(LinkRef(Arc::clone(entry)))
    }

    /// Marks a link detaching and drops it from the arena.
    ///
    /// References already handed out stay valid until released, but no
    /// new reference can be acquired.
    pub fn remove(&self, key: LinkKey) -> Option<LinkRef> {
        let entry = self.links.write().remove(&key)?;
        entry.detaching.store(true, Ordering::Release);
        Some(LinkRef(entry))
    }

    pub fn contains(&self, key: LinkKey) -> bool {
        self.links.read().contains_key(&key)
    }

    /// Number of outstanding references to a link, excluding the
    /// registry's own.
    pub fn ref_count(&self, key: LinkKey) -> Option<usize> {
        self.links
            .read()
            .get(&key)
            .map(|entry| Arc::strong_count(entry) - 1)
    }

    /// Keys of every link attached under `mld`, in link id order.
    pub fn keys_in(&self, mld: MldId) -> Vec<LinkKey> {
        let mut keys: Vec<LinkKey> = self
            .links
            .read()
            .keys()
            .filter(|key| key.mld == mld)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }
}
