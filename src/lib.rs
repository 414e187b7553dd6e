//! Lease-based distributed locks over a shared key-value store.
//!
//! Independent processes coordinate through a [`LeaseStore`] that offers
//! three atomic primitives: set-if-absent with a TTL, compare-and-delete and
//! compare-and-extend. Every acquisition gets a fresh owner id, and only that
//! id can extend or release the lease, so a holder whose lease has expired
//! can never delete the lock of whoever took it next.
//!
//! ```no_run
//! use fe_lease_lock::{storage, LockClient, LockConfig, StoreConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = storage::connect(&StoreConfig::from_env()).await?;
//! let client = LockClient::new(store, LockConfig::from_env())?;
//!
//! let handle = client.acquire("orders:42").await?;
//! let mut lost = handle.lost_signal();
//! tokio::select! {
//!     _ = do_protected_work() => handle.release().await?,
//!     reason = lost.lost() => eprintln!("lock lost: {:?}", reason),
//! }
//! # Ok(())
//! # }
//! # async fn do_protected_work() {}
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod models;
pub mod storage;
pub mod watchdog;

pub use client::LockClient;
pub use config::{LockConfig, StorageType, StoreConfig};
pub use error::{LockError, Result};
pub use handle::{LockHandle, LostSignal};
pub use models::{LockToken, LossReason};
pub use storage::LeaseStore;
pub use watchdog::{RenewPolicy, WatchdogState};
