//! Cluster membership boundary.
//!
//! The directed-presence registry is the only cluster-aware component in
//! the core: when this node joins or leaves a cluster the shared registry
//! it writes through is swapped underneath it, and it must republish its
//! locally-known entries into the new one. Everything else treats the
//! cluster as invisible behind [`crate::cache::KeyedCache`].

use tokio::sync::broadcast;

/// Membership transitions observed by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    /// This node joined a cluster; shared caches now point at cluster
    /// storage.
    Joined,
    /// This node left the cluster; shared caches reverted to local
    /// storage.
    Left,
}

/// Source of membership events.
pub trait ClusterBus: Send + Sync {
    /// Subscribe to membership transitions. Each subscriber gets every
    /// event from subscription time onward.
    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;
}

/// Standalone bus: never clustered, emits events only when the test
/// harness injects them.
pub struct LocalBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Inject a membership event. Used by tests to exercise the
    /// registry's reconciliation path.
    pub fn emit(&self, event: ClusterEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterBus for LocalBus {
    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ClusterEvent::Joined);
        bus.emit(ClusterEvent::Left);
        assert_eq!(rx.recv().await.unwrap(), ClusterEvent::Joined);
        assert_eq!(rx.recv().await.unwrap(), ClusterEvent::Left);
    }
}
