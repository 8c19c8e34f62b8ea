//! faasmem - Shared-memory segments backed by a pool of serverless actions

pub mod action;
pub mod config;
pub mod error;
pub mod guard;
pub mod idle;
pub mod key;
pub mod manager;
pub mod object;
pub mod pool;
pub mod runtime;
pub mod shared;
pub mod shm;

pub use action::{Action, ActionContext, ActionState};
pub use config::{ActionArtifact, PoolConfig, MIB};
pub use error::{Error, ErrorKind, Result};
pub use guard::KeyLease;
pub use idle::IdleActionPool;
pub use key::{Key, KeyAllocator, KeyPolicy};
pub use manager::{Manager, ManagerStats};
pub use object::ShmObject;
pub use pool::{ActionPool, Placement, PoolStats};
pub use runtime::{ActionRequest, ActionRuntime, ActionSpec, PingReply, RuntimeError};
pub use shared::{SharedActionRegistry, SharedActionStat};
pub use shm::Segment;
