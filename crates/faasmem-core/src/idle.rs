//! Warm pool of provisioned, unassigned actions

use crate::action::{Action, ActionContext};
use crate::config::PoolConfig;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Fallback period of the replenishment loop when nothing wakes it
const REFILL_TICK: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Counters {
    /// In-flight provisioning attempts plus queued actions
    pending: AtomicUsize,
    queued: AtomicUsize,
    next_id: AtomicU64,
}

/// Keeps `pool_size` actions provisioned and ready.
///
/// A background loop launches provisioning attempts whenever in-flight plus
/// queued actions fall below the pool size. Failed attempts are retried with
/// fresh action ids after a cooldown; the loop runs until the pool is shut
/// down or dropped.
pub struct IdleActionPool {
    capacity: usize,
    counters: Arc<Counters>,
    wake: Arc<Notify>,
    receiver: Mutex<mpsc::Receiver<Arc<Action>>>,
    supervisor: JoinHandle<()>,
}

impl IdleActionPool {
    /// Start replenishing. Must be called inside a tokio runtime.
    pub fn start(ctx: Arc<ActionContext>, config: &PoolConfig) -> Self {
        let capacity = config.pool_size.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let wake = Arc::new(Notify::new());

        let supervisor = tokio::spawn(replenish(
            Replenisher {
                ctx,
                capacity,
                cooldown: config.retry_cooldown,
                counters: Arc::clone(&counters),
                wake: Arc::clone(&wake),
                sender,
            },
            config.max_concurrent_provisions.max(1),
        ));

        Self {
            capacity,
            counters,
            wake,
            receiver: Mutex::new(receiver),
            supervisor,
        }
    }

    /// Target number of warm actions
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Actions provisioned and waiting
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    /// Provisioning attempts in flight, cooldowns included
    pub fn in_flight(&self) -> usize {
        self.counters
            .pending
            .load(Ordering::Acquire)
            .saturating_sub(self.queued())
    }

    /// Wait for a warm action and take it for exclusive use
    pub async fn take(&self) -> Result<Arc<Action>> {
        let action = self
            .receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::PoolClosed)?;

        self.counters.queued.fetch_sub(1, Ordering::AcqRel);
        self.counters.pending.fetch_sub(1, Ordering::AcqRel);
        self.wake.notify_one();
        tracing::debug!(action = %action.name(), "took idle action");
        Ok(action)
    }

    /// Like [`take`](Self::take), but switches the action to shared mode
    /// with full capacity first
    pub async fn take_for_sharing(&self) -> Result<Arc<Action>> {
        let action = self.take().await?;
        action.mark_shared()?;
        Ok(action)
    }

    /// Stop replenishing and tear down every queued action.
    ///
    /// Attempts still in flight tear their action down once they find the
    /// queue closed.
    pub async fn shutdown(&self) {
        self.supervisor.abort();

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Some(action) = receiver.recv().await {
            self.counters.queued.fetch_sub(1, Ordering::AcqRel);
            if let Err(e) = action.teardown().await {
                tracing::warn!(action = %action.name(), error = %e, "cannot tear down idle action");
            }
        }
    }
}

impl Drop for IdleActionPool {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

struct Replenisher {
    ctx: Arc<ActionContext>,
    capacity: usize,
    cooldown: Duration,
    counters: Arc<Counters>,
    wake: Arc<Notify>,
    sender: mpsc::Sender<Arc<Action>>,
}

async fn replenish(this: Replenisher, max_concurrent: usize) {
    let this = Arc::new(this);
    let limiter = Arc::new(Semaphore::new(max_concurrent));

    loop {
        while this.counters.pending.load(Ordering::Acquire) < this.capacity {
            this.counters.pending.fetch_add(1, Ordering::AcqRel);
            let id = this.counters.next_id.fetch_add(1, Ordering::AcqRel) + 1;
            let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
                return;
            };
            tokio::spawn(provision_one(Arc::clone(&this), id, permit));
        }

        tokio::select! {
            _ = this.wake.notified() => {}
            _ = tokio::time::sleep(REFILL_TICK) => {}
        }
    }
}

async fn provision_one(this: Arc<Replenisher>, id: u64, _permit: OwnedSemaphorePermit) {
    let action = Action::new(id, Arc::clone(&this.ctx));
    tracing::info!(action = %action.name(), "adding a new idle action");

    match action.provision().await {
        Ok(()) => {
            this.counters.queued.fetch_add(1, Ordering::AcqRel);
            if let Err(mpsc::error::SendError(action)) = this.sender.send(Arc::new(action)).await {
                this.counters.queued.fetch_sub(1, Ordering::AcqRel);
                this.counters.pending.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = action.teardown().await {
                    tracing::warn!(action = %action.name(), error = %e, "cannot tear down orphaned action");
                }
            }
        }
        Err(e) => {
            tracing::error!(
                action = %action.name(),
                error = %e,
                retry_in_ms = this.cooldown.as_millis() as u64,
                "cannot provision idle action"
            );
            tokio::time::sleep(this.cooldown).await;
            this.counters.pending.fetch_sub(1, Ordering::AcqRel);
            this.wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockRuntime, RuntimeCall};

    fn start(runtime: Arc<MockRuntime>, pool_size: usize) -> IdleActionPool {
        let config = PoolConfig {
            pool_size,
            retry_cooldown: Duration::from_millis(10),
            ..PoolConfig::default()
        };
        let ctx = Arc::new(ActionContext::new(runtime, &config));
        IdleActionPool::start(ctx, &config)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_fills_to_capacity() {
        let runtime = Arc::new(MockRuntime::new());
        let pool = start(Arc::clone(&runtime), 3);

        wait_for(|| pool.queued() == 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runtime.live_actions(), 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_take_triggers_replacement() {
        let runtime = Arc::new(MockRuntime::new());
        let pool = start(Arc::clone(&runtime), 1);

        let first = pool.take().await.unwrap();
        assert!(first.is_exclusive());
        wait_for(|| pool.queued() == 1).await;

        let second = pool.take().await.unwrap();
        assert_ne!(first.name(), second.name());
        assert!(runtime.is_live(first.name()));
    }

    #[tokio::test]
    async fn test_take_for_sharing_sets_capacity() {
        let runtime = Arc::new(MockRuntime::new());
        let pool = start(Arc::clone(&runtime), 1);

        let action = pool.take_for_sharing().await.unwrap();
        assert!(!action.is_exclusive());
        assert_eq!(action.remaining(), 512);
    }

    #[tokio::test]
    async fn test_failures_are_retried_with_new_ids() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_next_provisions(2);
        let pool = start(Arc::clone(&runtime), 1);

        let action = pool.take().await.unwrap();
        assert_eq!(action.name(), "StateFunction-3");
        assert!(runtime.count(|c| matches!(c, RuntimeCall::Provision { .. })) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_queued() {
        let runtime = Arc::new(MockRuntime::new());
        let pool = start(Arc::clone(&runtime), 2);
        wait_for(|| pool.queued() == 2).await;

        pool.shutdown().await;
        assert_eq!(runtime.live_actions(), 0);
        assert!(matches!(pool.take().await, Err(Error::PoolClosed)));
    }
}
