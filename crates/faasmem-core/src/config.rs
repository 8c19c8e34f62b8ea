//! Pool and allocation configuration

use crate::key::KeyPolicy;
use crate::{Error, Result};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Bytes per MiB
pub const MIB: u64 = 1024 * 1024;

/// First key handed out by default
pub const FIRST_SHM_KEY: u32 = 0x7777_0000;

/// Number of keys in the default namespace
pub const SHM_KEY_COUNT: u32 = 0x1_0000;

/// Code and image every action is provisioned from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionArtifact {
    /// Path of the action source uploaded to the platform
    pub code_path: PathBuf,
    /// Container image reference, `name:tag`
    pub image: String,
}

impl Default for ActionArtifact {
    fn default() -> Self {
        Self {
            code_path: PathBuf::from("action/__main__.py"),
            image: "kingdo/action-python-v3.10:latest".to_string(),
        }
    }
}

/// Tuning for the warm pool, the shared registry and the key namespace.
///
/// Capacities are counted in units of `unit_size` bytes; with the default
/// unit this is the platform's MB memory limit.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of provisioned, unassigned actions kept warm
    pub pool_size: usize,
    /// Memory every action needs on top of the segments it backs
    pub base_overhead_mb: u32,
    /// Capacity of a freshly shared action
    pub shared_capacity: u32,
    /// Requests above this many units get an exclusive action
    pub sharing_threshold: u32,
    /// Bytes per capacity unit
    pub unit_size: u64,
    /// Key namespace, half-open
    pub key_range: Range<u32>,
    /// How keys are drawn from the namespace
    pub key_policy: KeyPolicy,
    /// Action prefix; action `n` is named `{prefix}-{n}`
    pub action_prefix: String,
    /// Platform execution timeout for each action
    pub action_timeout_ms: u64,
    /// Keepalive ping period
    pub health_interval: Duration,
    /// Upper bound on a single ping
    pub ping_timeout: Duration,
    /// Wait after a failed background provisioning attempt
    pub retry_cooldown: Duration,
    /// Parallel background provisioning attempts
    pub max_concurrent_provisions: usize,
    /// Code and image
    pub artifact: ActionArtifact,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            base_overhead_mb: 64,
            shared_capacity: 512,
            sharing_threshold: 256,
            unit_size: MIB,
            key_range: FIRST_SHM_KEY..FIRST_SHM_KEY + SHM_KEY_COUNT,
            key_policy: KeyPolicy::FreeList,
            action_prefix: "StateFunction".to_string(),
            action_timeout_ms: 300_000,
            health_interval: Duration::from_secs(15),
            ping_timeout: Duration::from_secs(60),
            retry_cooldown: Duration::from_secs(10),
            max_concurrent_provisions: 2,
            artifact: ActionArtifact::default(),
        }
    }
}

impl PoolConfig {
    /// Check the values are usable together
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".to_string()));
        }
        if self.key_range.is_empty() {
            return Err(Error::Config(format!(
                "key range {:#x}..{:#x} is empty",
                self.key_range.start, self.key_range.end
            )));
        }
        if self.unit_size == 0 {
            return Err(Error::Config("unit_size must be non-zero".to_string()));
        }
        if self.shared_capacity == 0 {
            return Err(Error::Config("shared_capacity must be non-zero".to_string()));
        }
        if self.sharing_threshold > self.shared_capacity {
            return Err(Error::Config(format!(
                "sharing_threshold {} exceeds shared_capacity {}",
                self.sharing_threshold, self.shared_capacity
            )));
        }
        if self.max_concurrent_provisions == 0 {
            return Err(Error::Config(
                "max_concurrent_provisions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Capacity units needed for `bytes`, rounded up
    pub fn units_for(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.unit_size)
    }

    /// Memory a freshly provisioned action is created with
    pub fn initial_memory_mb(&self) -> u32 {
        self.shared_capacity + self.base_overhead_mb
    }
}
