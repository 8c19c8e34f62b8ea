//! One provisioned action container and its keepalive loop

use crate::config::{ActionArtifact, PoolConfig};
use crate::key::Key;
use crate::runtime::{ActionRequest, ActionRuntime, ActionSpec};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Settings shared by every action of one pool
pub struct ActionContext {
    pub runtime: Arc<dyn ActionRuntime>,
    pub artifact: Arc<ActionArtifact>,
    pub prefix: String,
    pub initial_memory_mb: u32,
    pub timeout_ms: u64,
    pub shared_capacity: u32,
    pub health_interval: Duration,
    pub ping_timeout: Duration,
}

impl ActionContext {
    pub fn new(runtime: Arc<dyn ActionRuntime>, config: &PoolConfig) -> Self {
        Self {
            runtime,
            artifact: Arc::new(config.artifact.clone()),
            prefix: config.action_prefix.clone(),
            initial_memory_mb: config.initial_memory_mb(),
            timeout_ms: config.action_timeout_ms,
            shared_capacity: config.shared_capacity,
            health_interval: config.health_interval,
            ping_timeout: config.ping_timeout,
        }
    }
}

/// Lifecycle of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Not yet provisioned
    New,
    /// Remote create in flight
    Provisioning,
    /// Provisioned and health-checked
    Ready,
    /// Provisioning failed; never reused
    Failed,
    /// Torn down
    Destroyed,
}

impl ActionState {
    fn as_str(self) -> &'static str {
        match self {
            ActionState::New => "not provisioned",
            ActionState::Provisioning => "provisioning",
            ActionState::Ready => "ready",
            ActionState::Failed => "failed",
            ActionState::Destroyed => "destroyed",
        }
    }
}

struct KeepAlive {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    state: ActionState,
    keepalive: Option<KeepAlive>,
}

/// A remote action container.
///
/// Starts exclusive; [`Action::mark_shared`] switches it once to shared
/// mode where `remaining` counts the capacity units still free.
pub struct Action {
    id: u64,
    name: String,
    ctx: Arc<ActionContext>,
    memory_mb: AtomicU32,
    exclusive: AtomicBool,
    remaining: AtomicU32,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("memory_mb", &self.memory_mb())
            .field("exclusive", &self.is_exclusive())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

impl Action {
    /// Create an unprovisioned action numbered `id`
    pub fn new(id: u64, ctx: Arc<ActionContext>) -> Self {
        Self {
            id,
            name: format!("{}-{}", ctx.prefix, id),
            memory_mb: AtomicU32::new(ctx.initial_memory_mb),
            exclusive: AtomicBool::new(true),
            remaining: AtomicU32::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: ActionState::New,
                keepalive: None,
            }),
            ctx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActionState {
        self.lifecycle.lock().state
    }

    /// Configured memory limit in MB
    pub fn memory_mb(&self) -> u32 {
        self.memory_mb.load(Ordering::Acquire)
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    /// Free shared capacity; always 0 for exclusive actions
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the keepalive loop is still running
    pub fn is_health_checking(&self) -> bool {
        self.lifecycle
            .lock()
            .keepalive
            .as_ref()
            .is_some_and(|k| !k.task.is_finished())
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: self.name.clone(),
            memory_mb: self.memory_mb(),
            timeout_ms: self.ctx.timeout_ms,
            artifact: Arc::clone(&self.ctx.artifact),
        }
    }

    fn expect_state(&self, expected: ActionState) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(Error::ActionState {
                action: self.name.clone(),
                state: state.as_str(),
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    fn set_state(&self, state: ActionState) {
        self.lifecycle.lock().state = state;
    }

    /// Create the action remotely, ping it once, then start the keepalive loop.
    ///
    /// On failure the action is left [`ActionState::Failed`] and must be dropped.
    pub async fn provision(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ActionState::New {
                return Err(Error::ActionState {
                    action: self.name.clone(),
                    state: lifecycle.state.as_str(),
                    expected: ActionState::New.as_str(),
                });
            }
            lifecycle.state = ActionState::Provisioning;
        }

        let started = Instant::now();
        let spec = self.spec();
        if let Err(source) = self.ctx.runtime.provision(&spec).await {
            self.set_state(ActionState::Failed);
            return Err(Error::Provisioning {
                action: self.name.clone(),
                op: "provision",
                source,
            });
        }

        if let Err(e) = ping_action(&self.ctx, &self.name).await {
            self.set_state(ActionState::Failed);
            if let Err(delete) = self.ctx.runtime.delete(&self.name).await {
                tracing::warn!(action = %self.name, error = %delete, "cannot delete unhealthy action");
            }
            return Err(e);
        }

        let keepalive = spawn_keepalive(Arc::clone(&self.ctx), self.name.clone());
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = ActionState::Ready;
            lifecycle.keepalive = Some(keepalive);
        }

        tracing::info!(
            action = %self.name,
            memory_mb = spec.memory_mb,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action provisioned"
        );
        Ok(())
    }

    /// Change the memory limit; a no-op when unchanged.
    ///
    /// Takes seconds on real platforms.
    pub async fn resize(&self, memory_mb: u32) -> Result<()> {
        self.expect_state(ActionState::Ready)?;

        let previous = self.memory_mb.swap(memory_mb, Ordering::AcqRel);
        if previous == memory_mb {
            return Ok(());
        }

        let started = Instant::now();
        if let Err(source) = self.ctx.runtime.update_memory(&self.spec()).await {
            self.memory_mb.store(previous, Ordering::Release);
            return Err(Error::Provisioning {
                action: self.name.clone(),
                op: "update",
                source,
            });
        }

        tracing::debug!(
            action = %self.name,
            from_mb = previous,
            to_mb = memory_mb,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action resized"
        );
        Ok(())
    }

    /// Health-check the action once
    pub async fn ping(&self) -> Result<()> {
        ping_action(&self.ctx, &self.name).await
    }

    /// Ask the action to create segment `key` of `size` bytes
    pub async fn materialize_segment(&self, key: Key, size: u64) -> Result<()> {
        self.invoke(ActionRequest::Create { key, size }).await
    }

    /// Ask the action to destroy segment `key`
    pub async fn release_segment(&self, key: Key) -> Result<()> {
        self.invoke(ActionRequest::Destroy { key }).await
    }

    async fn invoke(&self, request: ActionRequest) -> Result<()> {
        self.expect_state(ActionState::Ready)?;

        let out = self
            .ctx
            .runtime
            .invoke(&self.name, &request)
            .await
            .map_err(|source| Error::Invoke {
                action: self.name.clone(),
                op: request.op(),
                source,
            })?;
        tracing::debug!(action = %self.name, op = request.op(), result = %out.trim(), "action invoked");
        Ok(())
    }

    /// Stop the keepalive loop and delete the action remotely.
    ///
    /// The action counts as destroyed even when the remote delete fails.
    pub async fn teardown(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ActionState::Ready {
                return Err(Error::ActionState {
                    action: self.name.clone(),
                    state: lifecycle.state.as_str(),
                    expected: ActionState::Ready.as_str(),
                });
            }
            lifecycle.state = ActionState::Destroyed;
            if let Some(keepalive) = lifecycle.keepalive.take() {
                let _ = keepalive.stop.send(());
            }
        }

        let started = Instant::now();
        self.ctx
            .runtime
            .delete(&self.name)
            .await
            .map_err(|source| Error::Provisioning {
                action: self.name.clone(),
                op: "delete",
                source,
            })?;

        tracing::info!(
            action = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action torn down"
        );
        Ok(())
    }

    /// Switch to shared mode with full capacity. Happens once per action.
    pub fn mark_shared(&self) -> Result<()> {
        self.exclusive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                Error::InconsistentState(format!("action `{}` is already shared", self.name))
            })?;
        self.remaining
            .store(self.ctx.shared_capacity, Ordering::Release);
        Ok(())
    }

    /// Capacity a shared action starts with
    pub fn shared_capacity(&self) -> u32 {
        self.ctx.shared_capacity
    }

    /// Whether no shared capacity is in use
    pub fn is_fully_free(&self) -> bool {
        !self.is_exclusive() && self.remaining() == self.ctx.shared_capacity
    }

    /// Take `units` of shared capacity if they fit, without locking.
    ///
    /// Retries the compare-and-swap while the value changes underneath and
    /// the request still fits.
    pub fn try_reserve(&self, units: u32) -> bool {
        if self.is_exclusive() {
            return false;
        }
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(units)
            })
            .is_ok()
    }

    /// Return `units` of shared capacity, yielding the new remaining value
    pub fn give_back(&self, units: u32) -> Result<u32> {
        let capacity = self.ctx.shared_capacity;
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(units).filter(|&next| next <= capacity)
            })
            .map(|previous| previous + units)
            .map_err(|current| {
                Error::InconsistentState(format!(
                    "giving back {} units to `{}` would exceed capacity ({} of {} free)",
                    units, self.name, current, capacity
                ))
            })
    }

    /// Claim all capacity of an idle shared action so no borrow can land on it.
    pub(crate) fn seal(&self) -> bool {
        let capacity = self.ctx.shared_capacity;
        self.remaining
            .compare_exchange(capacity, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

async fn ping_action(ctx: &ActionContext, name: &str) -> Result<()> {
    match tokio::time::timeout(ctx.ping_timeout, ctx.runtime.ping(name)).await {
        Err(_) => Err(Error::PingTimeout {
            action: name.to_string(),
            secs: ctx.ping_timeout.as_secs(),
        }),
        Ok(Err(source)) => Err(Error::Provisioning {
            action: name.to_string(),
            op: "ping",
            source,
        }),
        Ok(Ok(reply)) if reply.is_pong() => {
            tracing::trace!(action = %name, "pong");
            Ok(())
        }
        Ok(Ok(reply)) => Err(Error::Unpong {
            action: name.to_string(),
            payload: format!("status {} body `{}`", reply.status_code, reply.body),
        }),
    }
}

/// Ping `name` every `health_interval` until stopped or a ping fails.
fn spawn_keepalive(ctx: Arc<ActionContext>, name: String) -> KeepAlive {
    let (stop, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let period = ctx.health_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = &mut stop_rx => return,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut stop_rx => return,
                result = ping_action(&ctx, &name) => {
                    if let Err(e) = result {
                        // left for the next caller to surface
                        tracing::warn!(action = %name, error = %e, "keepalive ping failed, stopping health checks");
                        return;
                    }
                }
            }
        }
    });

    KeepAlive { stop, task }
}
