//! POSIX shared memory segment wrapper

use crate::key::Key;
use crate::runtime::RuntimeError;
use shared_memory::{Shmem, ShmemConf};

/// OS name of the segment backing `key`
pub fn segment_os_id(key: Key) -> String {
    format!("/faasmem_{:08x}", key)
}

/// Shared memory segment owned by this process; unlinked on drop
pub struct Segment {
    inner: Shmem,
    key: Key,
    size: usize,
}

// Safety: the mapping is process-wide and only the owning map touches it
unsafe impl Send for Segment {}

impl Segment {
    /// Create and map a new segment for `key`
    pub fn create(key: Key, size: usize) -> Result<Self, RuntimeError> {
        // zero-length mappings are rejected by the OS
        let shmem = ShmemConf::new()
            .size(size.max(1))
            .os_id(segment_os_id(key))
            .create()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(e.to_string())))?;

        Ok(Self {
            inner: shmem,
            key,
            size,
        })
    }

    /// Key this segment was created for
    pub fn key(&self) -> Key {
        self.key
    }

    /// Requested size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// OS identifier other processes open the segment by
    pub fn os_id(&self) -> &str {
        self.inner.get_os_id()
    }
}
