//! Legacy AID free list.

use super::Aid;
use crate::error::{MloError, PoolKind, Result};

/// Fixed-size free list of AIDs `1..=max`.
///
/// `next[i]` links free index `i` to the following free index; `0` is the
/// sentinel and is never handed out. Allocation pops the head, release
/// appends at the tail, so a released id is reused only after every id
/// freed before it.
///
/// Releasing an id that is not currently allocated is the caller's
/// responsibility to prevent; the list does not re-validate ownership.
#[derive(Debug, Clone)]
pub struct AidFreeList {
    next: Vec<Aid>,
    head: Aid,
    tail: Aid,
    in_use: usize,
}

impl AidFreeList {
    /// Creates a pool holding every id in `1..=max`.
    pub fn new(max: Aid) -> Self {
        let mut next = vec![0; max as usize + 1];
        for id in 1..max {
            next[id as usize] = id + 1;
        }
        let (head, tail) = if max == 0 { (0, 0) } else { (1, max) };

        Self {
            next,
            head,
            tail,
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.next.len() - 1
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Pops the head of the free list.
    pub fn allocate(&mut self) -> Result<Aid> {
        let id = self.head;
        if id == 0 {
            return Err(MloError::PoolExhausted {
                pool: PoolKind::LinkAid,
            });
        }

        self.head = self.next[id as usize];
        self.next[id as usize] = 0;
        if self.head == 0 {
            self.tail = 0;
        }
        self.in_use += 1;

        Ok(id)
    }

    /// Appends `id` at the tail of the free list.
    ///
    /// Ids outside `1..=max` cannot be indexed and are dropped with a
    /// warning.
    pub fn release(&mut self, id: Aid) {
        if id == 0 || id as usize >= self.next.len() {
            tracing::warn!(aid = id, capacity = self.capacity(), "release of out-of-range AID ignored");
            return;
        }

        self.next[id as usize] = 0;
        if self.tail == 0 {
            self.head = id;
        } else {
            self.next[self.tail as usize] = id;
        }
        self.tail = id;
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Walks the free chain from the head.
    pub fn free_ids(&self) -> impl Iterator<Item = Aid> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            if cursor == 0 {
                return None;
            }
            let id = cursor;
            cursor = self.next[id as usize];
            Some(id)
        })
    }
}
