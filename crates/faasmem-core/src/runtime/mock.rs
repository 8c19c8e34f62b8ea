//! Recording runtime with failure injection.
//!
//! Lets tests drive the pool without a platform while asserting on the exact
//! sequence of remote calls.

use super::{ActionRequest, ActionRuntime, ActionSpec, PingReply, RuntimeError, RuntimeFuture};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

/// One remote call seen by [`MockRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Provision { name: String, memory_mb: u32 },
    UpdateMemory { name: String, memory_mb: u32 },
    Ping { name: String },
    Invoke { name: String, request: ActionRequest },
    Delete { name: String },
}

#[derive(Default)]
struct Faults {
    provision_failures: usize,
    fail_updates: bool,
    fail_invokes: bool,
    fail_deletes: bool,
    ping_payload: Option<String>,
    ping_hangs: bool,
    provision_delay: Option<Duration>,
    invoke_delay: Option<Duration>,
}

#[derive(Default)]
struct State {
    calls: Vec<RuntimeCall>,
    live: HashSet<String>,
    faults: Faults,
}

/// In-memory [`ActionRuntime`].
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` provision calls
    pub fn fail_next_provisions(&self, n: usize) {
        self.state.lock().faults.provision_failures = n;
    }

    /// Fail every memory update
    pub fn fail_updates(&self, fail: bool) {
        self.state.lock().faults.fail_updates = fail;
    }

    /// Fail every invoke
    pub fn fail_invokes(&self, fail: bool) {
        self.state.lock().faults.fail_invokes = fail;
    }

    /// Fail every delete
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().faults.fail_deletes = fail;
    }

    /// Answer pings with this body instead of `PONG`
    pub fn ping_payload(&self, payload: Option<&str>) {
        self.state.lock().faults.ping_payload = payload.map(str::to_string);
    }

    /// Never answer pings
    pub fn ping_hangs(&self, hang: bool) {
        self.state.lock().faults.ping_hangs = hang;
    }

    /// Delay every provision call
    pub fn provision_delay(&self, delay: Option<Duration>) {
        self.state.lock().faults.provision_delay = delay;
    }

    /// Delay every invoke
    pub fn invoke_delay(&self, delay: Option<Duration>) {
        self.state.lock().faults.invoke_delay = delay;
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `pred`
    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Actions provisioned and not yet deleted
    pub fn live_actions(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Whether `name` is provisioned and not deleted
    pub fn is_live(&self, name: &str) -> bool {
        self.state.lock().live.contains(name)
    }

    fn record(&self, call: RuntimeCall) {
        self.state.lock().calls.push(call);
    }
}

impl ActionRuntime for MockRuntime {
    fn provision<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.record(RuntimeCall::Provision {
                name: spec.name.clone(),
                memory_mb: spec.memory_mb,
            });
            let delay = self.state.lock().faults.provision_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock();
            if state.faults.provision_failures > 0 {
                state.faults.provision_failures -= 1;
                return Err(RuntimeError::Injected(format!("provision {}", spec.name)));
            }
            state.live.insert(spec.name.clone());
            Ok(())
        })
    }

    fn update_memory<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.record(RuntimeCall::UpdateMemory {
                name: spec.name.clone(),
                memory_mb: spec.memory_mb,
            });
            if self.state.lock().faults.fail_updates {
                return Err(RuntimeError::Injected(format!("update {}", spec.name)));
            }
            Ok(())
        })
    }

    fn ping<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, PingReply> {
        Box::pin(async move {
            self.record(RuntimeCall::Ping {
                name: name.to_string(),
            });
            let (hangs, payload) = {
                let state = self.state.lock();
                (state.faults.ping_hangs, state.faults.ping_payload.clone())
            };
            if hangs {
                std::future::pending::<()>().await;
            }
            Ok(match payload {
                Some(body) => PingReply {
                    status_code: 200,
                    body,
                },
                None => PingReply::pong(),
            })
        })
    }

    fn invoke<'a>(
        &'a self,
        name: &'a str,
        request: &'a ActionRequest,
    ) -> RuntimeFuture<'a, String> {
        Box::pin(async move {
            self.record(RuntimeCall::Invoke {
                name: name.to_string(),
                request: *request,
            });
            let delay = self.state.lock().faults.invoke_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.lock().faults.fail_invokes {
                return Err(RuntimeError::Injected(format!("{} on {}", request.op(), name)));
            }
            Ok(r#"{"statusCode":200,"body":"OK"}"#.to_string())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.record(RuntimeCall::Delete {
                name: name.to_string(),
            });
            let mut state = self.state.lock();
            state.live.remove(name);
            if state.faults.fail_deletes {
                return Err(RuntimeError::Injected(format!("delete {}", name)));
            }
            Ok(())
        })
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}
