//! Bin-packing registry of shared actions

use crate::action::Action;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Entries {
    list: Vec<Arc<Action>>,
    index: HashMap<String, usize>,
}

impl Entries {
    fn remove(&mut self, position: usize) -> Arc<Action> {
        let action = self.list.remove(position);
        self.index.remove(action.name());
        for (i, later) in self.list.iter().enumerate().skip(position) {
            self.index.insert(later.name().to_string(), i);
        }
        action
    }
}

/// Remaining capacity of one shared action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedActionStat {
    pub name: String,
    pub remaining: u32,
}

/// Actions currently multiplexing small allocations.
///
/// Structural changes (add, evict) serialize on one mutex. Capacity itself is
/// taken with per-action compare-and-swap, so concurrent borrows only hold
/// the mutex long enough to copy the entry list.
#[derive(Default)]
pub struct SharedActionRegistry {
    entries: Mutex<Entries>,
}

impl SharedActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident shared actions
    pub async fn len(&self) -> usize {
        self.entries.lock().await.list.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Take `units` from the first action, in insertion order, that has room.
    ///
    /// `None` means no resident action fits; nothing was reserved.
    pub async fn borrow(&self, units: u32) -> Option<Arc<Action>> {
        let snapshot = self.entries.lock().await.list.clone();
        let found = snapshot.into_iter().find(|action| action.try_reserve(units));
        if let Some(action) = &found {
            tracing::debug!(action = %action.name(), units, remaining = action.remaining(), "borrowed shared capacity");
        }
        found
    }

    /// Register an action fresh from [`crate::IdleActionPool::take_for_sharing`]
    pub async fn add(&self, action: Arc<Action>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !action.is_fully_free() {
            return Err(Error::InconsistentState(format!(
                "action `{}` must have {} free units to be shared, has {}",
                action.name(),
                action.shared_capacity(),
                action.remaining()
            )));
        }
        if entries.index.contains_key(action.name()) {
            return Err(Error::InconsistentState(format!(
                "action `{}` is already shared",
                action.name()
            )));
        }

        let position = entries.list.len();
        entries.index.insert(action.name().to_string(), position);
        entries.list.push(action);
        Ok(())
    }

    /// Return `units` to `action`.
    ///
    /// An action whose capacity is entirely free again is evicted and torn
    /// down, unless it is the last one resident. A teardown failure is
    /// reported but the action stays evicted.
    pub async fn give_back(&self, action: &Action, units: u32) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let Some(&position) = entries.index.get(action.name()) else {
            return Err(Error::InconsistentState(format!(
                "no shared action named `{}`",
                action.name()
            )));
        };

        let remaining = action.give_back(units)?;
        tracing::debug!(action = %action.name(), units, remaining, "gave back shared capacity");

        if remaining == action.shared_capacity() && entries.list.len() > 1 && action.seal() {
            let evicted = entries.remove(position);
            tracing::info!(action = %evicted.name(), resident = entries.list.len(), "evicting idle shared action");
            evicted.teardown().await?;
        }
        Ok(())
    }

    /// Remaining capacity per resident action, in insertion order
    pub async fn stats(&self) -> Vec<SharedActionStat> {
        self.entries
            .lock()
            .await
            .list
            .iter()
            .map(|a| SharedActionStat {
                name: a.name().to_string(),
                remaining: a.remaining(),
            })
            .collect()
    }

    /// Evict and tear down every resident action
    pub async fn shutdown(&self) {
        let drained = std::mem::take(&mut *self.entries.lock().await);
        for action in drained.list {
            if let Err(e) = action.teardown().await {
                tracing::warn!(action = %action.name(), error = %e, "cannot tear down shared action");
            }
        }
    }
}
