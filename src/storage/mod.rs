pub mod memory;
pub mod redis;

use crate::config::{StorageType, StoreConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use self::memory::MemoryLeaseStore;
use self::redis::RedisLeaseStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Minimal atomic key-value contract the lock client depends on.
///
/// Every mutating operation must be a single indivisible step on the store
/// side, and keys must expire on their own once their TTL elapses.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create `key` owned by `owner_id` with `ttl` only if it does not exist.
    async fn set_if_absent(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it is currently owned by `owner_id`.
    async fn compare_and_delete(&self, key: &str, owner_id: &str) -> Result<bool>;

    /// Reset the TTL of `key` only if it is currently owned by `owner_id`.
    async fn compare_and_extend(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Current owner of `key`, for diagnostics only.
    async fn current_owner(&self, key: &str) -> Result<Option<String>>;
}

/// Build the configured backend and start its background tasks.
///
/// Must be called from within a tokio runtime.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn LeaseStore>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Using memory lease store");

            let store = if config.memory_persist_enabled {
                info!("Memory persistence enabled: {}", config.memory_persist_path);
                info!(
                    "Persistence interval: {} seconds",
                    config.memory_persist_interval
                );
                Arc::new(MemoryLeaseStore::with_persistence(PathBuf::from(
                    &config.memory_persist_path,
                )))
            } else {
                Arc::new(MemoryLeaseStore::new())
            };

            if config.memory_persist_enabled {
                match store.load_from_disk().await {
                    Ok(count) if count > 0 => info!("Restored {} leases from disk", count),
                    Ok(_) => {}
                    Err(e) => log::warn!("Failed to load leases from disk: {:#}", e),
                }
                store.spawn_persister(Duration::from_secs(config.memory_persist_interval.max(1)));
            }

            store.spawn_sweeper(Duration::from_secs(config.memory_sweep_interval.max(1)));

            Ok(store as Arc<dyn LeaseStore>)
        }
        StorageType::Redis => {
            info!("Using Redis lease store");
            let redis_url = config
                .redis_url
                .as_deref()
                .context("Redis URL not configured")?;
            let store = RedisLeaseStore::new(
                redis_url,
                config.redis_username.clone(),
                config.redis_password.clone(),
                config.redis_db,
            )
            .await
            .context("Failed to connect to Redis")?
            .with_prefix(&config.redis_key_prefix);
            Ok(Arc::new(store) as Arc<dyn LeaseStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_builds_memory_store_by_default() {
        let store = connect(&StoreConfig::default()).await.unwrap();
        assert!(store
            .set_if_absent("res-1", "a", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(
            store.current_owner("res-1").await.unwrap().as_deref(),
            Some("a")
        );
    }

    #[tokio::test]
    async fn connect_requires_redis_url() {
        let config = StoreConfig {
            storage_type: StorageType::Redis,
            ..StoreConfig::default()
        };
        assert!(connect(&config).await.is_err());
    }
}
