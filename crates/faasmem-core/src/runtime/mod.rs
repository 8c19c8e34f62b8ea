//! Function-platform backends that actually provision and invoke actions.
//!
//! The pool only needs five capabilities from a platform: provision an
//! action, change its memory limit, ping it, invoke it with a segment
//! operation, and delete it. [`ActionRuntime`] captures exactly that, and a
//! deployment picks one adapter:
//!
//! - [`RestRuntime`]: REST control plane of an OpenWhisk-style platform
//! - [`CliRuntime`]: the platform's `wsk` command line
//! - [`LocalRuntime`]: single-host backend that maps segments in-process
//! - [`MockRuntime`]: recording backend with failure injection, for tests

pub mod cli;
pub mod local;
pub mod mock;
pub mod rest;

pub use cli::CliRuntime;
pub use local::LocalRuntime;
pub use mock::MockRuntime;
pub use rest::RestRuntime;

use crate::config::ActionArtifact;
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Literal payload a healthy action answers a ping with
pub const PONG: &str = "PONG";

/// Boxed future returned by [`ActionRuntime`] methods
pub type RuntimeFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RuntimeError>> + Send + 'a>>;

/// Errors reported by a runtime adapter.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with a non-success status.
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },

    /// A platform command exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The answer could not be decoded.
    #[error("cannot decode `{body}`: {cause}")]
    Decode { body: String, cause: String },

    /// The action is unknown to the platform.
    #[error("no action named `{0}`")]
    UnknownAction(String),

    /// Local I/O, e.g. reading the code artifact.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Deliberately injected by [`MockRuntime`].
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Full definition of an action as sent to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: String,
    pub memory_mb: u32,
    pub timeout_ms: u64,
    pub artifact: Arc<ActionArtifact>,
}

/// Request body understood by the action code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ActionRequest {
    Ping,
    Create { key: Key, size: u64 },
    Destroy { key: Key },
}

impl ActionRequest {
    /// Operation name
    pub fn op(&self) -> &'static str {
        match self {
            ActionRequest::Ping => "ping",
            ActionRequest::Create { .. } => "create",
            ActionRequest::Destroy { .. } => "destroy",
        }
    }
}

/// What an action answered to a ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReply {
    pub status_code: u16,
    pub body: String,
}

impl PingReply {
    /// A healthy answer
    pub fn pong() -> Self {
        Self {
            status_code: 200,
            body: PONG.to_string(),
        }
    }

    /// Whether this is the expected `PONG` with status 200
    pub fn is_pong(&self) -> bool {
        self.status_code == 200 && self.body == PONG
    }

    /// Parse an action result object, `{"body": "PONG", "statusCode": 200}`.
    ///
    /// `statusCode` is accepted as number or string.
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| RuntimeError::Decode {
                body: raw.to_string(),
                cause: e.to_string(),
            })?;

        let status_code = match &value["statusCode"] {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .unwrap_or(0),
            serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        let body = match &value["body"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };

        Ok(Self { status_code, body })
    }
}

/// Capabilities the pool needs from a function platform.
pub trait ActionRuntime: Send + Sync + 'static {
    /// Create (or overwrite) the action described by `spec`
    fn provision<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()>;

    /// Change the memory limit of an existing action.
    ///
    /// Receives the whole definition: platform updates overwrite it.
    fn update_memory<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()>;

    /// Health-check an action
    fn ping<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, PingReply>;

    /// Run a segment operation inside an action, returning its raw result
    fn invoke<'a>(&'a self, name: &'a str, request: &'a ActionRequest)
        -> RuntimeFuture<'a, String>;

    /// Delete an action
    fn delete<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Short adapter name for logs
    fn kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let create = serde_json::to_value(ActionRequest::Create {
            key: 0x7777_0001,
            size: 1024,
        })
        .unwrap();
        assert_eq!(
            create,
            serde_json::json!({"op": "create", "key": 0x7777_0001u32, "size": 1024})
        );

        let destroy = serde_json::to_value(ActionRequest::Destroy { key: 7 }).unwrap();
        assert_eq!(destroy, serde_json::json!({"op": "destroy", "key": 7}));

        let ping = serde_json::to_value(ActionRequest::Ping).unwrap();
        assert_eq!(ping, serde_json::json!({"op": "ping"}));
    }

    #[test]
    fn test_parse_pong_variants() {
        assert!(PingReply::parse(r#"{"body":"PONG","statusCode":"200"}"#)
            .unwrap()
            .is_pong());
        assert!(PingReply::parse(r#"{"body":"PONG","statusCode":200}"#)
            .unwrap()
            .is_pong());

        let wrong = PingReply::parse(r#"{"body":"PANG","statusCode":200}"#).unwrap();
        assert!(!wrong.is_pong());
        assert_eq!(wrong.body, "PANG");

        let failed = PingReply::parse(r#"{"body":"PONG","statusCode":"500"}"#).unwrap();
        assert!(!failed.is_pong());
    }

    #[test]
    fn test_out_of_range_status_is_not_ok() {
        // 65736 wraps to 200 if narrowed
        let wrapped = PingReply::parse(r#"{"body":"PONG","statusCode":65736}"#).unwrap();
        assert_eq!(wrapped.status_code, 0);
        assert!(!wrapped.is_pong());

        let text = PingReply::parse(r#"{"body":"PONG","statusCode":"65736"}"#).unwrap();
        assert!(!text.is_pong());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            PingReply::parse("<html>"),
            Err(RuntimeError::Decode { .. })
        ));
    }
}
