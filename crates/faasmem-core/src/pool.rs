//! Routing of allocations to exclusive or shared actions

use crate::action::{Action, ActionContext};
use crate::config::PoolConfig;
use crate::idle::IdleActionPool;
use crate::runtime::ActionRuntime;
use crate::shared::{SharedActionRegistry, SharedActionStat};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Action chosen to back one allocation
#[derive(Debug, Clone)]
pub struct Placement {
    /// Backing action
    pub action: Arc<Action>,
    /// Capacity units reserved on it
    pub units: u32,
}

impl Placement {
    pub fn is_exclusive(&self) -> bool {
        self.action.is_exclusive()
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_queued: usize,
    pub idle_in_flight: usize,
    pub shared: Vec<SharedActionStat>,
}

/// Warm idle actions plus the shared registry.
///
/// Requests above the sharing threshold take a whole idle action, resized to
/// fit; everything else is bin-packed onto shared actions.
pub struct ActionPool {
    config: PoolConfig,
    idle: IdleActionPool,
    shared: SharedActionRegistry,
}

impl ActionPool {
    /// Start replenishing and wait for the first shared action.
    pub async fn start(runtime: Arc<dyn ActionRuntime>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let ctx = Arc::new(ActionContext::new(runtime, &config));
        let idle = IdleActionPool::start(ctx, &config);
        let shared = SharedActionRegistry::new();
        shared.add(idle.take_for_sharing().await?).await?;

        Ok(Self {
            config,
            idle,
            shared,
        })
    }

    /// Configuration the pool runs with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Shared registry
    pub fn shared(&self) -> &SharedActionRegistry {
        &self.shared
    }

    /// Idle pool
    pub fn idle(&self) -> &IdleActionPool {
        &self.idle
    }

    /// Find an action able to hold `bytes`
    pub async fn acquire(&self, bytes: u64) -> Result<Placement> {
        let units = self.config.units_for(bytes);
        if units > u64::from(self.config.sharing_threshold) {
            self.acquire_exclusive(bytes, units).await
        } else {
            // bounded by the threshold, which is a u32
            self.acquire_shared(units as u32).await
        }
    }

    async fn acquire_exclusive(&self, bytes: u64, units: u64) -> Result<Placement> {
        let (units, memory_mb) = u32::try_from(units)
            .ok()
            .and_then(|u| u.checked_add(self.config.base_overhead_mb).map(|m| (u, m)))
            .ok_or_else(|| Error::Exhausted(format!("{bytes} bytes exceed any action size")))?;

        let started = Instant::now();
        let action = self.idle.take().await?;
        if let Err(e) = action.resize(memory_mb).await {
            tracing::error!(action = %action.name(), error = %e, "cannot resize exclusive action");
            if let Err(teardown) = action.teardown().await {
                tracing::warn!(action = %action.name(), error = %teardown, "cannot tear down misconfigured action");
            }
            return Err(e);
        }

        tracing::info!(
            action = %action.name(),
            memory_mb,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "instantiated exclusive action"
        );
        Ok(Placement { action, units })
    }

    async fn acquire_shared(&self, units: u32) -> Result<Placement> {
        if let Some(action) = self.shared.borrow(units).await {
            return Ok(Placement { action, units });
        }

        let fresh = self.idle.take_for_sharing().await?;
        if let Err(e) = self.shared.add(Arc::clone(&fresh)).await {
            tracing::error!(action = %fresh.name(), error = %e, "cannot register shared action");
            if let Err(teardown) = fresh.teardown().await {
                tracing::warn!(action = %fresh.name(), error = %teardown, "cannot tear down unregistered action");
            }
            return Err(e);
        }

        self.shared
            .borrow(units)
            .await
            .map(|action| Placement { action, units })
            .ok_or_else(|| {
                Error::InconsistentState(format!(
                    "no shared action fits {units} units right after adding `{}`",
                    fresh.name()
                ))
            })
    }

    /// Undo a placement: tear down an exclusive action, or give the units
    /// back to the shared registry
    pub async fn reclaim(&self, action: &Action, units: u32) -> Result<()> {
        if action.is_exclusive() {
            action.teardown().await
        } else {
            self.shared.give_back(action, units).await
        }
    }

    /// Occupancy snapshot
    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            idle_queued: self.idle.queued(),
            idle_in_flight: self.idle.in_flight(),
            shared: self.shared.stats().await,
        }
    }

    /// Stop replenishing and tear down idle and shared actions
    pub async fn shutdown(&self) {
        self.idle.shutdown().await;
        self.shared.shutdown().await;
    }
}
