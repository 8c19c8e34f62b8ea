//! End-to-end tests against real POSIX shared memory.
//!
//! Run with: cargo test --package faasmem-core --features integration

#[cfg(all(test, feature = "integration"))]
mod integration {
    use shared_memory::ShmemConf;
    use std::sync::Arc;
    use std::time::Duration;

    use faasmem_core::runtime::LocalRuntime;
    use faasmem_core::shm::segment_os_id;
    use faasmem_core::{ActionRuntime, Manager, PoolConfig, MIB};

    /// Key window per test so parallel tests never collide on segment names
    fn config(first_key: u32) -> PoolConfig {
        PoolConfig {
            pool_size: 1,
            key_range: first_key..first_key + 16,
            retry_cooldown: Duration::from_millis(10),
            ..PoolConfig::default()
        }
    }

    async fn start(first_key: u32) -> (Arc<LocalRuntime>, Manager) {
        let runtime = Arc::new(LocalRuntime::new());
        let manager = Manager::start(
            Arc::clone(&runtime) as Arc<dyn ActionRuntime>,
            config(first_key),
        )
        .await
        .unwrap();
        (runtime, manager)
    }

    /// A second mapping sees bytes written through the first
    #[tokio::test]
    async fn test_segment_is_shared_between_mappings() {
        let (_runtime, manager) = start(0x7777_e000).await;

        let key = manager.create_shm("frames", 4096).await.unwrap();
        let os_id = segment_os_id(key);

        let writer = ShmemConf::new().os_id(&os_id).open().unwrap();
        let reader = ShmemConf::new().os_id(&os_id).open().unwrap();
        let data = b"Hello from another mapping!";
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), writer.as_ptr(), data.len());
            let seen = std::slice::from_raw_parts(reader.as_ptr(), data.len());
            assert_eq!(seen, data);
        }

        drop(writer);
        drop(reader);
        manager.destroy_shm("frames").await.unwrap();
        assert!(ShmemConf::new().os_id(&os_id).open().is_err());
    }

    #[tokio::test]
    async fn test_exclusive_action_is_resized_and_deleted() {
        let (runtime, manager) = start(0x7777_e100).await;

        manager.create_shm("big", 300 * MIB).await.unwrap();
        let object = manager.object("big").unwrap();
        assert!(object.is_exclusive());
        let action = object.action.name().to_string();
        assert_eq!(runtime.memory_of(&action), Some(364));
        assert_eq!(runtime.segment_count(&action), 1);

        manager.destroy_shm("big").await.unwrap();
        assert_eq!(runtime.memory_of(&action), None);
    }

    #[tokio::test]
    async fn test_shutdown_unlinks_segments() {
        let (_runtime, manager) = start(0x7777_e200).await;

        let small = manager.create_shm("small", 64).await.unwrap();
        let big = manager.create_shm("big", 257 * MIB).await.unwrap();
        manager.shutdown().await;

        assert!(ShmemConf::new().os_id(segment_os_id(small)).open().is_err());
        assert!(ShmemConf::new().os_id(segment_os_id(big)).open().is_err());
    }
}
