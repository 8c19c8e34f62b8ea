//! Single-host runtime that maps segments in this process

use super::{ActionRequest, ActionRuntime, ActionSpec, PingReply, RuntimeError, RuntimeFuture};
use crate::key::Key;
use crate::shm::Segment;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct LocalAction {
    memory_mb: u32,
    segments: HashMap<Key, Segment>,
}

/// [`ActionRuntime`] without a platform: every "action" is a record in this
/// process and `create` maps a real POSIX segment other local processes can
/// open by [`crate::shm::segment_os_id`].
#[derive(Default)]
pub struct LocalRuntime {
    actions: Mutex<HashMap<String, LocalAction>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory limit recorded for an action
    pub fn memory_of(&self, name: &str) -> Option<u32> {
        self.actions.lock().get(name).map(|a| a.memory_mb)
    }

    /// Segments currently mapped for an action
    pub fn segment_count(&self, name: &str) -> usize {
        self.actions
            .lock()
            .get(name)
            .map_or(0, |a| a.segments.len())
    }

    fn apply(&self, name: &str, request: &ActionRequest) -> Result<String, RuntimeError> {
        let mut actions = self.actions.lock();
        let action = actions
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownAction(name.to_string()))?;

        match *request {
            ActionRequest::Ping => Ok(super::PONG.to_string()),
            ActionRequest::Create { key, size } => {
                if action.segments.contains_key(&key) {
                    return Err(RuntimeError::Status {
                        code: 409,
                        body: format!("segment {key} already exists"),
                    });
                }
                let segment = Segment::create(key, size as usize)?;
                let id = segment.os_id().to_string();
                tracing::debug!(
                    action = name,
                    key = segment.key(),
                    size = segment.size(),
                    os_id = %id,
                    "mapped segment"
                );
                action.segments.insert(key, segment);
                Ok(id)
            }
            ActionRequest::Destroy { key } => match action.segments.remove(&key) {
                Some(segment) => {
                    tracing::debug!(
                        action = name,
                        key = segment.key(),
                        size = segment.size(),
                        "unlinking segment"
                    );
                    Ok(segment.os_id().to_string())
                }
                None => Err(RuntimeError::Status {
                    code: 404,
                    body: format!("segment {key} not found"),
                }),
            },
        }
    }
}

impl ActionRuntime for LocalRuntime {
    fn provision<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.actions.lock().entry(spec.name.clone()).or_default().memory_mb = spec.memory_mb;
            Ok(())
        })
    }

    fn update_memory<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut actions = self.actions.lock();
            let action = actions
                .get_mut(&spec.name)
                .ok_or_else(|| RuntimeError::UnknownAction(spec.name.clone()))?;
            action.memory_mb = spec.memory_mb;
            Ok(())
        })
    }

    fn ping<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, PingReply> {
        Box::pin(async move {
            if self.actions.lock().contains_key(name) {
                Ok(PingReply::pong())
            } else {
                Err(RuntimeError::UnknownAction(name.to_string()))
            }
        })
    }

    fn invoke<'a>(
        &'a self,
        name: &'a str,
        request: &'a ActionRequest,
    ) -> RuntimeFuture<'a, String> {
        Box::pin(async move { self.apply(name, request) })
    }

    fn delete<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            // dropping the record unlinks its segments
            self.actions
                .lock()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RuntimeError::UnknownAction(name.to_string()))
        })
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionArtifact;
    use std::sync::Arc;

    fn spec(name: &str, memory_mb: u32) -> ActionSpec {
        ActionSpec {
            name: name.to_string(),
            memory_mb,
            timeout_ms: 1000,
            artifact: Arc::new(ActionArtifact::default()),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_without_segments() {
        let runtime = LocalRuntime::new();
        runtime.provision(&spec("a", 576)).await.unwrap();
        assert!(runtime.ping("a").await.unwrap().is_pong());

        runtime.update_memory(&spec("a", 1088)).await.unwrap();
        assert_eq!(runtime.memory_of("a"), Some(1088));

        runtime.delete("a").await.unwrap();
        assert!(runtime.ping("a").await.is_err());
        assert!(matches!(
            runtime.delete("a").await,
            Err(RuntimeError::UnknownAction(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_unknown_action() {
        let runtime = LocalRuntime::new();
        let err = runtime
            .invoke("ghost", &ActionRequest::Destroy { key: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownAction(_)));
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_segments_follow_requests() {
        let runtime = LocalRuntime::new();
        runtime.provision(&spec("seg", 576)).await.unwrap();

        let key = 0x7777_ffe0;
        let id = runtime
            .invoke("seg", &ActionRequest::Create { key, size: 8192 })
            .await
            .unwrap();
        assert_eq!(id, crate::shm::segment_os_id(key));
        assert_eq!(runtime.segment_count("seg"), 1);

        runtime
            .invoke("seg", &ActionRequest::Destroy { key })
            .await
            .unwrap();
        assert_eq!(runtime.segment_count("seg"), 0);
        assert!(runtime
            .invoke("seg", &ActionRequest::Destroy { key })
            .await
            .is_err());
    }
}
