//! Keyed cache boundary.
//!
//! Rosters and the directed-presence registry persist through this trait
//! rather than owning storage. A cluster-backed implementation replicates
//! `put`/`remove` and makes `lock` a cluster-wide mutex; the in-memory
//! implementation here serves single-node deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;

/// A replicated key-value namespace with per-key mutual exclusion.
///
/// Values are opaque serialized bytes; callers own the encoding. `lock`
/// returns a guard that holds the key's mutex for the guard's lifetime, so
/// read-modify-write sequences stay atomic across the cluster.
#[async_trait]
pub trait KeyedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Acquire the cluster-wide mutex for `key`.
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()>;
}

/// DashMap-backed cache for single-node runs and the test harness.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl KeyedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.mutex_for(key).lock_owned().await
    }
}
