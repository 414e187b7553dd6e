#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fe_lease_lock::storage::memory::MemoryLeaseStore;
use fe_lease_lock::{LeaseStore, LockClient, LockConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// Memory store with switchable outages and latency, standing in for a
/// store behind a network.
#[derive(Default)]
pub struct FlakyStore {
    inner: Arc<MemoryLeaseStore>,
    down: AtomicBool,
    hang: AtomicBool,
    latency_ms: AtomicU64,
    write_delay_ms: AtomicU64,
    deletes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls fail immediately with an error.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Calls never complete.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Every call waits this long before reaching the store.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// `set_if_absent` lands this long after it is issued, even if the
    /// caller stopped waiting for the answer.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn set_if_absent(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        self.gate().await?;
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay == 0 {
            return self.inner.set_if_absent(key, owner_id, ttl).await;
        }
        // the write runs detached, so dropping this future does not cancel it
        let inner = Arc::clone(&self.inner);
        let (key, owner_id) = (key.to_string(), owner_id.to_string());
        let write = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            inner.set_if_absent(&key, &owner_id, ttl).await
        });
        write.await?
    }

    async fn compare_and_delete(&self, key: &str, owner_id: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.inner.compare_and_delete(key, owner_id).await
    }

    async fn compare_and_extend(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        self.gate().await?;
        self.inner.compare_and_extend(key, owner_id, ttl).await
    }

    async fn current_owner(&self, key: &str) -> Result<Option<String>> {
        self.inner.current_owner(key).await
    }
}

/// A client standing in for one independent process.
pub fn process(store: Arc<dyn LeaseStore>, name: &str) -> LockClient {
    LockClient::new(
        store,
        LockConfig {
            client_name: name.to_string(),
            retry_jitter: Duration::from_millis(20),
            ..LockConfig::default()
        },
    )
    .expect("valid config")
}

pub fn frozen_process(store: Arc<dyn LeaseStore>, name: &str) -> LockClient {
    LockClient::new(
        store,
        LockConfig {
            client_name: name.to_string(),
            auto_renew: false,
            ..LockConfig::default()
        },
    )
    .expect("valid config")
}
