//! RAII key lease

use crate::key::{Key, KeyAllocator};
use std::sync::Arc;

/// A key that goes back to its allocator on drop unless committed.
///
/// Creation paths take a lease first and only commit once the segment is
/// recorded, so every early return hands the key back.
pub struct KeyLease {
    key: Key,
    allocator: Arc<KeyAllocator>,
    /// Whether this lease still owns the release responsibility
    should_release: bool,
}

impl KeyLease {
    pub(crate) fn new(key: Key, allocator: Arc<KeyAllocator>) -> Self {
        Self {
            key,
            allocator,
            should_release: true,
        }
    }

    /// Leased key
    pub fn key(&self) -> Key {
        self.key
    }

    /// Keep the key allocated past this guard
    pub fn commit(mut self) -> Key {
        self.should_release = false;
        self.key
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if self.should_release && !self.allocator.release(self.key) {
            tracing::error!(key = self.key, "leased key was not held at rollback");
        }
    }
}

impl KeyAllocator {
    /// Allocate a key wrapped in a [`KeyLease`]
    pub fn lease(self: &Arc<Self>) -> crate::Result<KeyLease> {
        let key = self.allocate()?;
        Ok(KeyLease::new(key, Arc::clone(self)))
    }
}
