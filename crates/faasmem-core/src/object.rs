//! Named shared-memory object record

use crate::action::Action;
use crate::key::Key;
use std::sync::Arc;

/// A client-visible shared-memory allocation
#[derive(Debug, Clone)]
pub struct ShmObject {
    /// Client-chosen unique name
    pub name: String,
    /// Key the segment was created under
    pub key: Key,
    /// Requested size in bytes
    pub size: u64,
    /// Capacity units reserved on `action`
    pub units: u32,
    /// Backing action, possibly shared with other objects
    pub action: Arc<Action>,
}

impl ShmObject {
    /// Whether the backing action serves only this object
    pub fn is_exclusive(&self) -> bool {
        self.action.is_exclusive()
    }
}
