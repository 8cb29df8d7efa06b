//! Directed presence registry.
//!
//! When a user sends available presence straight to someone outside their
//! roster-derived audience, that recipient must later be told when the
//! sender goes offline even though no subscription links them. The
//! registry records who was handed such presence, keyed by sender, and is
//! replicated through the keyed cache so any node can answer for any
//! sender.
//!
//! A `handler` is the full address that will route the eventual
//! unavailable: the sending client session itself, or a service address
//! when the presence went through a component. Client handlers are
//! removed whole on a directed unavailable (the session retracts
//! everything it sent); service handlers shed one receiver at a time.

use dashmap::DashMap;
use perch_proto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::KeyedCache;
use crate::error::StoreError;
use crate::metrics;

const KEY_PREFIX: &str = "directed:";

/// One handler's set of directed-presence receivers for a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectedPresence {
    pub handler: Address,
    pub receivers: HashSet<Address>,
}

impl DirectedPresence {
    fn new(handler: Address) -> Self {
        Self {
            handler,
            receivers: HashSet::new(),
        }
    }

    /// Client sessions retract all their directed presence at once;
    /// services track receivers individually.
    fn is_client_handler(&self) -> bool {
        self.handler.local().is_some()
    }
}

pub struct DirectedPresenceRegistry {
    cache: Arc<dyn KeyedCache>,
    /// Entries originated by sessions on this node. Republished into the
    /// shared cache after a cluster membership change swaps it out.
    local: DashMap<String, Vec<DirectedPresence>>,
}

impl DirectedPresenceRegistry {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self {
            cache,
            local: DashMap::new(),
        }
    }

    fn key(sender: &Address) -> String {
        format!("{KEY_PREFIX}{sender}")
    }

    async fn load(&self, key: &str) -> Result<Vec<DirectedPresence>, StoreError> {
        match self.cache.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, key: &str, entries: &[DirectedPresence]) -> Result<(), StoreError> {
        if entries.is_empty() {
            self.cache.remove(key).await?;
            self.local.remove(key);
        } else {
            let bytes =
                serde_json::to_vec(entries).map_err(|e| StoreError::Backend(e.to_string()))?;
            self.cache.put(key, bytes.clone()).await?;
            self.local.insert(key.to_owned(), entries.to_vec());
        }
        Ok(())
    }

    /// Record that `handler` delivered `sender`'s directed available
    /// presence to `receiver`.
    pub async fn record(
        &self,
        sender: &Address,
        handler: Address,
        receiver: Address,
    ) -> Result<(), StoreError> {
        let key = Self::key(sender);
        let _guard = self.cache.lock(&key).await;

        let mut entries = self.load(&key).await?;
        match entries.iter_mut().find(|e| e.handler == handler) {
            Some(entry) => {
                entry.receivers.insert(receiver);
            }
            None => {
                let mut entry = DirectedPresence::new(handler);
                entry.receivers.insert(receiver);
                entries.push(entry);
                metrics::record_directed_event("entry_created");
            }
        }
        self.store(&key, &entries).await?;
        debug!(%sender, "directed presence recorded");
        Ok(())
    }

    /// Retract a directed presence after the sender addressed `receiver`
    /// with a directed unavailable.
    pub async fn retract(
        &self,
        sender: &Address,
        handler: &Address,
        receiver: &Address,
    ) -> Result<(), StoreError> {
        let key = Self::key(sender);
        let _guard = self.cache.lock(&key).await;

        let mut entries = self.load(&key).await?;
        entries.retain_mut(|entry| {
            if entry.handler != *handler {
                return true;
            }
            if entry.is_client_handler() {
                return false;
            }
            entry.receivers.remove(receiver);
            !entry.receivers.is_empty()
        });
        self.store(&key, &entries).await?;
        metrics::record_directed_event("retracted");
        Ok(())
    }

    /// Drop the sender's whole entry, returning every receiver that must
    /// still be told the sender went unavailable.
    pub async fn clear(&self, sender: &Address) -> Result<Vec<Address>, StoreError> {
        let key = Self::key(sender);
        let _guard = self.cache.lock(&key).await;

        let entries = self.load(&key).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        self.cache.remove(&key).await?;
        self.local.remove(&key);
        metrics::record_directed_event("entry_cleared");

        let mut receivers: Vec<Address> = entries
            .into_iter()
            .flat_map(|e| e.receivers.into_iter())
            .collect();
        receivers.sort();
        receivers.dedup();
        Ok(receivers)
    }

    /// Every receiver currently recorded for the sender.
    pub async fn receivers(&self, sender: &Address) -> Result<Vec<Address>, StoreError> {
        let key = Self::key(sender);
        let entries = self.load(&key).await?;
        let mut receivers: Vec<Address> = entries
            .into_iter()
            .flat_map(|e| e.receivers.into_iter())
            .collect();
        receivers.sort();
        receivers.dedup();
        Ok(receivers)
    }

    /// Republish locally-originated entries into the shared cache.
    ///
    /// Run once after a cluster membership change: the node's shared
    /// cache was swapped (joined: local storage replaced by cluster
    /// storage; left: the reverse) and the new one has never seen this
    /// node's entries.
    pub async fn republish(&self) {
        for entry in self.local.iter() {
            let bytes = match serde_json::to_vec(entry.value()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key = %entry.key(), error = %e, "directed entry not republishable");
                    continue;
                }
            };
            if let Err(e) = self.cache.put(entry.key(), bytes).await {
                warn!(key = %entry.key(), error = %e, "directed entry republish failed");
            }
        }
        metrics::record_directed_event("republished");
    }
}
