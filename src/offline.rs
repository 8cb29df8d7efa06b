//! Offline message boundary.
//!
//! Messages queued while a user had no available session are flooded to
//! the session that first becomes available. The queue itself lives
//! behind this trait; the core only drains it.

use async_trait::async_trait;
use dashmap::DashMap;
use perch_proto::Stanza;

use crate::error::StoreError;

#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Drain and return every stanza queued for `username`, oldest first.
    async fn drain(&self, username: &str) -> Result<Vec<Stanza>, StoreError>;

    /// Queue a stanza for later delivery, stamping messages with the
    /// time they were queued.
    async fn enqueue(&self, username: &str, stanza: Stanza) -> Result<(), StoreError>;
}

/// In-process queue used by the daemon and tests.
#[derive(Default)]
pub struct MemoryOfflineStore {
    queues: DashMap<String, Vec<Stanza>>,
}

impl MemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineStore for MemoryOfflineStore {
    async fn drain(&self, username: &str) -> Result<Vec<Stanza>, StoreError> {
        Ok(self
            .queues
            .remove(username)
            .map(|(_, q)| q)
            .unwrap_or_default())
    }

    async fn enqueue(&self, username: &str, stanza: Stanza) -> Result<(), StoreError> {
        let stanza = match stanza {
            Stanza::Message {
                from,
                to,
                body,
                delay: None,
            } => Stanza::Message {
                from,
                to,
                body,
                delay: Some(chrono::Utc::now()),
            },
            other => other,
        };
        self.queues.entry(username.to_owned()).or_default().push(stanza);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_preserves_order_and_empties_queue() {
        let store = MemoryOfflineStore::new();
        for body in ["first", "second"] {
            store
                .enqueue(
                    "alice",
                    Stanza::Message {
                        from: "bob@example.org".parse().unwrap(),
                        to: "alice@example.org".parse().unwrap(),
                        body: body.into(),
                        delay: None,
                    },
                )
                .await
                .unwrap();
        }

        let drained = store.drain("alice").await.unwrap();
        assert_eq!(drained.len(), 2);
        match &drained[0] {
            Stanza::Message { body, delay, .. } => {
                assert_eq!(body, "first");
                assert!(delay.is_some());
            }
            other => panic!("unexpected stanza: {other:?}"),
        }
        assert!(store.drain("alice").await.unwrap().is_empty());
    }
}
