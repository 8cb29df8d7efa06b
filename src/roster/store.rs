//! Roster store: one live in-memory roster per owner, persisted through
//! the keyed cache.
//!
//! Loading the same owner twice returns the same `Arc`, so every mutation
//! path in the process funnels through one `RwLock`. Cross-node
//! serialization comes from `lock_owner`, the cache's cluster-wide per-key
//! mutex; any read-modify-write against a roster that forwards stanzas
//! holds it for the whole sequence.

use dashmap::DashMap;
use parking_lot::RwLock;
use perch_proto::BareAddress;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::roster::Roster;
use crate::cache::KeyedCache;
use crate::error::StoreError;
use crate::metrics;

const KEY_PREFIX: &str = "roster:";

pub struct RosterStore {
    cache: Arc<dyn KeyedCache>,
    live: DashMap<String, Arc<RwLock<Roster>>>,
}

impl RosterStore {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self {
            cache,
            live: DashMap::new(),
        }
    }

    fn key(owner: &BareAddress) -> String {
        format!("{KEY_PREFIX}{owner}")
    }

    /// Cluster-wide mutex for one owner's roster. Hold this across any
    /// load-mutate-save-forward sequence.
    pub async fn lock_owner(&self, owner: &BareAddress) -> OwnedMutexGuard<()> {
        self.cache.lock(&Self::key(owner)).await
    }

    /// Load the owner's roster, creating an empty one on first use.
    /// Subsequent calls return the cached `Arc`.
    pub async fn roster(&self, owner: &BareAddress) -> Result<Arc<RwLock<Roster>>, StoreError> {
        let key = Self::key(owner);
        if let Some(live) = self.live.get(&key) {
            return Ok(live.clone());
        }

        let loaded = match self.cache.get(&key).await? {
            Some(bytes) => Roster::from_bytes(owner.clone(), &bytes)?,
            None => Roster::new(owner.clone()),
        };

        // Two tasks may race the load; the entry API makes one win and the
        // loser's copy is dropped.
        let roster = self
            .live
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(loaded)))
            .clone();
        metrics::set_resident_rosters(self.live.len() as i64);
        Ok(roster)
    }

    /// Persist the roster's current state.
    pub async fn save(&self, roster: &Arc<RwLock<Roster>>) -> Result<(), StoreError> {
        let (key, bytes) = {
            let guard = roster.read();
            (Self::key(guard.owner()), guard.to_bytes()?)
        };
        self.cache.put(&key, bytes).await
    }

    /// Drop the owner's roster entirely. Account deletion cascades here.
    pub async fn delete(&self, owner: &BareAddress) -> Result<(), StoreError> {
        let key = Self::key(owner);
        self.live.remove(&key);
        metrics::set_resident_rosters(self.live.len() as i64);
        self.cache.remove(&key).await?;
        debug!(%owner, "roster deleted");
        Ok(())
    }

    /// Evict the in-memory copy without touching storage, for tests and
    /// cache-pressure handling.
    pub fn evict(&self, owner: &BareAddress) {
        self.live.remove(&Self::key(owner));
        metrics::set_resident_rosters(self.live.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::roster::item::{RosterItem, SubState};

    fn store() -> RosterStore {
        RosterStore::new(Arc::new(MemoryCache::new()))
    }

    fn owner() -> BareAddress {
        "alice@example.org".parse().unwrap()
    }

    #[tokio::test]
    async fn repeated_loads_share_one_instance() {
        let store = store();
        let a = store.roster(&owner()).await.unwrap();
        let b = store.roster(&owner()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn save_survives_eviction() {
        let store = store();
        let roster = store.roster(&owner()).await.unwrap();
        let version = {
            let mut guard = roster.write();
            let mut item = RosterItem::new("bob@example.org".parse().unwrap());
            item.sub = SubState::Both;
            guard.create(item).unwrap();
            guard.version().to_owned()
        };
        store.save(&roster).await.unwrap();
        store.evict(&owner());

        let reloaded = store.roster(&owner()).await.unwrap();
        assert!(!Arc::ptr_eq(&roster, &reloaded));
        let guard = reloaded.read();
        assert_eq!(guard.count(), 1);
        assert_eq!(guard.version(), version);
    }

    #[tokio::test]
    async fn delete_cascades_to_storage() {
        let store = store();
        let roster = store.roster(&owner()).await.unwrap();
        {
            let mut guard = roster.write();
            guard.create(RosterItem::new("bob@example.org".parse().unwrap())).unwrap();
        }
        store.save(&roster).await.unwrap();

        store.delete(&owner()).await.unwrap();
        let fresh = store.roster(&owner()).await.unwrap();
        assert_eq!(fresh.read().count(), 0);
    }
}
