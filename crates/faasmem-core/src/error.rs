//! Error types for faasmem

use crate::runtime::RuntimeError;
use thiserror::Error;

/// Coarse classification of an [`Error`], used by front ends to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key namespace or registry capacity exhausted; the client may retry later.
    Exhaustion,
    /// A remote create/update/delete/ping/invoke call failed.
    Provisioning,
    /// Unknown object name or key.
    NotFound,
    /// The object name is already taken.
    Conflict,
    /// A programming invariant was violated.
    InconsistentState,
    /// Bad configuration or request values.
    InvalidInput,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("key namespace exhausted: {0}")]
    Exhausted(String),

    #[error("cannot find object named `{0}`")]
    NotFound(String),

    #[error("object `{0}` already exists")]
    AlreadyExists(String),

    #[error("{op} of action `{action}` failed: {source}")]
    Provisioning {
        action: String,
        op: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("invoking `{op}` on action `{action}` failed: {source}")]
    Invoke {
        action: String,
        op: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("ping of action `{action}` timed out after {secs}s")]
    PingTimeout { action: String, secs: u64 },

    #[error("action `{action}` answered ping with unexpected payload: {payload}")]
    Unpong { action: String, payload: String },

    #[error("action `{action}` is {state}, expected {expected}")]
    ActionState {
        action: String,
        state: &'static str,
        expected: &'static str,
    },

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("idle action pool is shut down")]
    PoolClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Exhausted(_) | Error::PoolClosed => ErrorKind::Exhaustion,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::Conflict,
            Error::Provisioning { .. }
            | Error::Invoke { .. }
            | Error::PingTimeout { .. }
            | Error::Unpong { .. } => ErrorKind::Provisioning,
            Error::ActionState { .. } | Error::InconsistentState(_) => {
                ErrorKind::InconsistentState
            }
            Error::Config(_) | Error::InvalidRequest(_) => ErrorKind::InvalidInput,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
