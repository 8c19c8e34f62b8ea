//! Name-keyed registry of shared-memory objects

use crate::config::PoolConfig;
use crate::key::{Key, KeyAllocator};
use crate::object::ShmObject;
use crate::pool::{ActionPool, PoolStats};
use crate::runtime::ActionRuntime;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

enum Slot {
    /// A create for this name is in progress
    Reserved,
    Live(Arc<ShmObject>),
    /// A destroy for this name is in progress
    Destroying(Arc<ShmObject>),
}

/// Snapshot of manager occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub objects: usize,
    pub keys_held: usize,
    pub key_capacity: usize,
    pub pool: PoolStats,
}

/// Ties object names to `(key, size, action)` and implements
/// create/get/destroy.
///
/// The name map is guarded by one mutex held only for structural changes,
/// never across a remote call. Create and destroy run on their own task, so
/// a caller that stops waiting (client disconnect, timeout) never leaves a
/// half-finished operation behind.
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    keys: Arc<KeyAllocator>,
    pool: ActionPool,
    objects: Mutex<HashMap<String, Slot>>,
}

/// Removes a [`Slot::Reserved`] entry on drop unless fulfilled
struct NameReservation<'a> {
    objects: &'a Mutex<HashMap<String, Slot>>,
    name: &'a str,
    fulfilled: bool,
}

impl NameReservation<'_> {
    fn fulfil(mut self, object: Arc<ShmObject>) {
        self.objects
            .lock()
            .insert(self.name.to_string(), Slot::Live(object));
        self.fulfilled = true;
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        if !self.fulfilled {
            let mut objects = self.objects.lock();
            if matches!(objects.get(self.name), Some(Slot::Reserved)) {
                objects.remove(self.name);
            }
        }
    }
}

impl Manager {
    /// Start an action pool on `runtime` and wrap it
    pub async fn start(runtime: Arc<dyn ActionRuntime>, config: PoolConfig) -> Result<Self> {
        let pool = ActionPool::start(runtime, config).await?;
        Ok(Self::new(pool))
    }

    /// Wrap a running pool, with a key namespace taken from its config
    pub fn new(pool: ActionPool) -> Self {
        let config = pool.config();
        let keys = Arc::new(KeyAllocator::new(config.key_range.clone(), config.key_policy));
        Self::with_keys(pool, keys)
    }

    /// Wrap a running pool with an explicit key allocator
    pub fn with_keys(pool: ActionPool, keys: Arc<KeyAllocator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys,
                pool,
                objects: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn pool(&self) -> &ActionPool {
        &self.inner.pool
    }

    pub fn keys(&self) -> &KeyAllocator {
        &self.inner.keys
    }

    /// Create a segment of `size` bytes named `name` and return its key.
    ///
    /// Every failure after the key is allocated releases it again, and any
    /// capacity reserved for the segment is returned. Runs to completion even
    /// if the returned future is dropped.
    pub async fn create_shm(&self, name: &str, size: u64) -> Result<Key> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        detach(async move { inner.create_shm(&name, size).await }).await
    }

    /// Key of a live object
    pub fn get_shm(&self, name: &str) -> Result<Key> {
        self.object(name).map(|o| o.key)
    }

    /// Full record of a live object
    pub fn object(&self, name: &str) -> Result<Arc<ShmObject>> {
        match self.inner.objects.lock().get(name) {
            Some(Slot::Live(object)) | Some(Slot::Destroying(object)) => Ok(Arc::clone(object)),
            Some(Slot::Reserved) | None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Destroy the segment named `name`.
    ///
    /// If the action refuses to release the segment the object stays live.
    /// After that, cleanup is best effort: the name and key are removed even
    /// when returning capacity or tearing down the action fails, and that
    /// failure is reported. Runs to completion even if the returned future is
    /// dropped.
    pub async fn destroy_shm(&self, name: &str) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        detach(async move { inner.destroy_shm(&name).await }).await
    }

    /// Names of live objects
    pub fn names(&self) -> Vec<String> {
        self.inner
            .objects
            .lock()
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Reserved))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Occupancy snapshot
    pub async fn stats(&self) -> ManagerStats {
        let objects = self.names().len();
        ManagerStats {
            objects,
            keys_held: self.inner.keys.held(),
            key_capacity: self.inner.keys.capacity(),
            pool: self.inner.pool.stats().await,
        }
    }

    /// Tear down exclusive actions of live objects, then the pool itself.
    ///
    /// Segments are not released one by one; deleting an action drops them.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

/// Run `operation` on its own task and wait for it
async fn detach<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| Error::InconsistentState(format!("manager task failed: {e}")))?
}

impl Inner {
    fn reserve_name<'a>(&'a self, name: &'a str) -> Result<NameReservation<'a>> {
        let mut objects = self.objects.lock();
        if objects.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        objects.insert(name.to_string(), Slot::Reserved);
        Ok(NameReservation {
            objects: &self.objects,
            name,
            fulfilled: false,
        })
    }

    async fn create_shm(&self, name: &str, size: u64) -> Result<Key> {
        if name.is_empty() {
            return Err(Error::InvalidRequest("object name is empty".to_string()));
        }
        if size == 0 {
            return Err(Error::InvalidRequest(format!(
                "object `{name}` must have a non-zero size"
            )));
        }

        let started = Instant::now();
        let reservation = self.reserve_name(name)?;
        let lease = self.keys.lease()?;
        let key = lease.key();
        let key_ms = started.elapsed().as_millis() as u64;

        let placement = self.pool.acquire(size).await?;
        let acquire_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = placement.action.materialize_segment(key, size).await {
            tracing::error!(name, key, action = %placement.action.name(), error = %e, "cannot create segment");
            if let Err(undo) = self
                .pool
                .reclaim(&placement.action, placement.units)
                .await
            {
                tracing::warn!(action = %placement.action.name(), error = %undo, "cannot reclaim placement");
            }
            return Err(e);
        }

        let object = Arc::new(ShmObject {
            name: name.to_string(),
            key: lease.commit(),
            size,
            units: placement.units,
            action: placement.action,
        });
        tracing::info!(
            name,
            key,
            size,
            action = %object.action.name(),
            exclusive = object.is_exclusive(),
            key_ms,
            acquire_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "created shared memory object"
        );
        reservation.fulfil(object);
        Ok(key)
    }

    async fn destroy_shm(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let object = {
            let mut objects = self.objects.lock();
            let slot = objects
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            let Slot::Live(object) = slot else {
                return Err(Error::NotFound(name.to_string()));
            };
            let object = Arc::clone(object);
            *slot = Slot::Destroying(Arc::clone(&object));
            object
        };

        if let Err(e) = object.action.release_segment(object.key).await {
            self.objects
                .lock()
                .insert(name.to_string(), Slot::Live(Arc::clone(&object)));
            return Err(e);
        }

        let cleanup = self.pool.reclaim(&object.action, object.units).await;
        let key_released = self.keys.release(object.key);
        self.objects.lock().remove(name);

        tracing::info!(
            name,
            key = object.key,
            action = %object.action.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "destroyed shared memory object"
        );

        cleanup?;
        if !key_released {
            let err = Error::InconsistentState(format!(
                "key {:#x} of `{}` was not held",
                object.key, name
            ));
            tracing::error!(error = %err, "key release failed");
            return Err(err);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let drained: Vec<Arc<ShmObject>> = self
            .objects
            .lock()
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Live(object) | Slot::Destroying(object) => Some(object),
                Slot::Reserved => None,
            })
            .collect();

        for object in drained {
            self.keys.release(object.key);
            if object.is_exclusive() {
                if let Err(e) = object.action.teardown().await {
                    tracing::warn!(name = %object.name, error = %e, "cannot tear down exclusive action");
                }
            }
        }
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIB;
    use crate::runtime::mock::{MockRuntime, RuntimeCall};
    use crate::runtime::ActionRequest;
    use std::time::Duration;

    async fn start(runtime: &Arc<MockRuntime>) -> Manager {
        let config = PoolConfig {
            pool_size: 2,
            retry_cooldown: Duration::from_millis(10),
            ..PoolConfig::default()
        };
        Manager::start(Arc::clone(runtime) as Arc<dyn ActionRuntime>, config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_destroy_round_trip() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;

        let key = manager.create_shm("buf1", 1_048_576).await.unwrap();
        assert!((0x7777_0000..0x7778_0000).contains(&key));
        assert_eq!(manager.get_shm("buf1").unwrap(), key);

        manager.destroy_shm("buf1").await.unwrap();
        assert!(matches!(manager.get_shm("buf1"), Err(Error::NotFound(_))));
        assert_eq!(manager.keys().held(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;

        manager.create_shm("a", 100).await.unwrap();
        assert!(matches!(
            manager.create_shm("a", 100).await,
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(manager.keys().held(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_one_name() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = Arc::new(start(&runtime).await);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.create_shm("same", 4096).await.is_ok() })
            })
            .collect();
        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(manager.keys().held(), 1);
    }

    #[tokio::test]
    async fn test_destroy_unknown_has_no_side_effects() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        let before = runtime.calls().len();

        assert!(matches!(
            manager.destroy_shm("ghost").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(runtime.calls().len(), before);
    }

    #[tokio::test]
    async fn test_small_objects_share_an_action() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;

        manager.create_shm("x", 10 * MIB).await.unwrap();
        manager.create_shm("y", 10 * MIB).await.unwrap();
        let x = manager.object("x").unwrap();
        let y = manager.object("y").unwrap();
        assert!(Arc::ptr_eq(&x.action, &y.action));
        assert_eq!(x.action.remaining(), 512 - 20);

        manager.destroy_shm("x").await.unwrap();
        assert_eq!(y.action.remaining(), 512 - 10);
    }

    #[tokio::test]
    async fn test_large_object_gets_its_own_action() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;

        manager.create_shm("big", 512 * MIB).await.unwrap();
        let big = manager.object("big").unwrap();
        assert!(big.is_exclusive());
        let name = big.action.name().to_string();
        assert!(runtime.is_live(&name));

        manager.destroy_shm("big").await.unwrap();
        assert!(!runtime.is_live(&name));
    }

    #[tokio::test]
    async fn test_failed_materialize_unwinds() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        runtime.fail_invokes(true);

        let err = manager.create_shm("a", 64 * MIB).await.unwrap_err();
        assert!(matches!(err, Error::Invoke { op: "create", .. }));
        assert_eq!(manager.keys().held(), 0);
        assert!(manager.get_shm("a").is_err());

        let stats = manager.stats().await;
        assert_eq!(stats.pool.shared[0].remaining, 512);

        // the name is free again
        runtime.fail_invokes(false);
        manager.create_shm("a", 64 * MIB).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_release_keeps_object() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        let key = manager.create_shm("a", 1024).await.unwrap();

        runtime.fail_invokes(true);
        assert!(manager.destroy_shm("a").await.is_err());
        assert_eq!(manager.get_shm("a").unwrap(), key);

        runtime.fail_invokes(false);
        manager.destroy_shm("a").await.unwrap();
        let destroys = runtime.count(|c| {
            matches!(c, RuntimeCall::Invoke { request: ActionRequest::Destroy { .. }, .. })
        });
        assert_eq!(destroys, 2);
    }

    #[tokio::test]
    async fn test_failed_teardown_still_forgets_object() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        manager.create_shm("big", 400 * MIB).await.unwrap();

        runtime.fail_deletes(true);
        assert!(manager.destroy_shm("big").await.is_err());
        assert!(matches!(manager.get_shm("big"), Err(Error::NotFound(_))));
        assert_eq!(manager.keys().held(), 0);
    }

    #[tokio::test]
    async fn test_key_exhaustion_and_recovery() {
        let runtime = Arc::new(MockRuntime::new());
        let config = PoolConfig {
            key_range: 0..2,
            ..PoolConfig::default()
        };
        let manager = Manager::start(Arc::clone(&runtime) as Arc<dyn ActionRuntime>, config)
            .await
            .unwrap();

        manager.create_shm("a", 1).await.unwrap();
        let b = manager.create_shm("b", 1).await.unwrap();
        assert!(matches!(
            manager.create_shm("c", 1).await,
            Err(Error::Exhausted(_))
        ));
        assert!(manager.get_shm("c").is_err());

        manager.destroy_shm("b").await.unwrap();
        assert_eq!(manager.create_shm("c", 1).await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_zero_size_is_rejected() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;

        assert!(matches!(
            manager.create_shm("empty", 0).await,
            Err(Error::InvalidRequest(_))
        ));
        assert_eq!(manager.keys().held(), 0);
        assert!(manager.names().is_empty());
        assert_eq!(manager.stats().await.pool.shared[0].remaining, 512);
        manager.create_shm("empty", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_create_still_completes() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        runtime.invoke_delay(Some(Duration::from_millis(200)));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), manager.create_shm("a", 100 * MIB))
                .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let object = manager.object("a").unwrap();
        assert_eq!(manager.keys().held(), 1);
        assert_eq!(object.action.remaining(), 412);

        runtime.invoke_delay(None);
        manager.destroy_shm("a").await.unwrap();
        assert_eq!(manager.keys().held(), 0);
        assert_eq!(manager.stats().await.pool.shared[0].remaining, 512);
    }

    #[tokio::test]
    async fn test_abandoned_destroy_still_completes() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        manager.create_shm("a", 100 * MIB).await.unwrap();
        runtime.invoke_delay(Some(Duration::from_millis(100)));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(30), manager.destroy_shm("a")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(manager.get_shm("a"), Err(Error::NotFound(_))));
        assert_eq!(manager.keys().held(), 0);
        assert_eq!(manager.stats().await.pool.shared[0].remaining, 512);

        runtime.invoke_delay(None);
        manager.create_shm("a", 100 * MIB).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_tears_everything_down() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = start(&runtime).await;
        manager.create_shm("small", MIB).await.unwrap();
        manager.create_shm("big", 300 * MIB).await.unwrap();

        manager.shutdown().await;
        // replacements still in flight tear themselves down
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.live_actions(), 0);
        assert!(manager.names().is_empty());
    }
}
