//! Bitmap id allocator and its locked, shareable wrapper.

use parking_lot::Mutex;

use crate::error::{MloError, PoolKind, Result};

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-size bitmap of ids.
///
/// Bit `i` set means id `i + 1` is owned; id `0` is never issued.
#[derive(Debug, Clone)]
pub struct IdBitmap {
    words: Vec<u64>,
    max: usize,
    in_use: usize,
}

impl IdBitmap {
    /// Ids are `u16`, so `max` is capped at `u16::MAX`.
    pub fn new(max: usize) -> Self {
        let max = max.min(u16::MAX as usize);
        Self {
            words: vec![0; max.div_ceil(WORD_BITS)],
            max,
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Claims the lowest clear bit and returns its id.
    pub fn allocate(&mut self) -> Option<u16> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = w * WORD_BITS + bit;
            if index >= self.max {
                return None;
            }
            let id = u16::try_from(index + 1).ok()?;
            *word |= 1 << bit;
            self.in_use += 1;
            return Some(id);
        }
        None
    }

    /// Clears the bit of `id`. Id `0`, out-of-range ids and ids that are
    /// already free are ignored.
    pub fn release(&mut self, id: u16) -> bool {
        let Some(index) = (id as usize).checked_sub(1) else {
            return false;
        };
        if index >= self.max {
            return false;
        }
        let mask = 1u64 << (index % WORD_BITS);
        let word = &mut self.words[index / WORD_BITS];
        if *word & mask == 0 {
            return false;
        }
        *word &= !mask;
        self.in_use -= 1;
        true
    }

    pub fn is_allocated(&self, id: u16) -> bool {
        match (id as usize).checked_sub(1) {
            Some(index) if index < self.max => {
                self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
            }
            _ => false,
        }
    }
}

/// An [`IdBitmap`] guarded by a mutex, safe to share between links.
///
/// Every operation takes the lock for its whole duration, so two
/// concurrent `allocate` calls can never return the same id.
#[derive(Debug)]
pub struct SharedIdPool {
    kind: PoolKind,
    bitmap: Mutex<IdBitmap>,
}

impl SharedIdPool {
    pub fn new(kind: PoolKind, max: usize) -> Self {
        Self {
            kind,
            bitmap: Mutex::new(IdBitmap::new(max)),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn allocate(&self) -> Result<u16> {
        self.bitmap
            .lock()
            .allocate()
            .ok_or(MloError::PoolExhausted { pool: self.kind })
    }

    /// Returns the id to the pool; never fails.
    pub fn release(&self, id: u16) {
        if !self.bitmap.lock().release(id) {
            tracing::debug!(pool = %self.kind, id, "release of unowned id ignored");
        }
    }

    pub fn is_allocated(&self, id: u16) -> bool {
        self.bitmap.lock().is_allocated(id)
    }

    pub fn in_use(&self) -> usize {
        self.bitmap.lock().in_use()
    }

    pub fn capacity(&self) -> usize {
        self.bitmap.lock().capacity()
    }
}
