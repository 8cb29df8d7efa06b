//! Central server state.
//!
//! `Aviary` ties the subsystems together: sessions, rosters, the directed
//! presence registry, and the injected collaborator boundaries. Handlers
//! receive it as `Arc<Aviary>` and reach everything through it.

use perch_proto::{Address, BareAddress, RosterQuery, RosterQueryKind, Stanza};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::cache::KeyedCache;
use crate::cluster::ClusterBus;
use crate::config::Config;
use crate::error::HandlerResult;
use crate::metrics;
use crate::offline::OfflineStore;
use crate::presence::DirectedPresenceRegistry;
use crate::roster::{push_visible, RosterItem, RosterStore};
use crate::session::SessionManager;

pub struct Aviary {
    pub config: Config,
    pub sessions: SessionManager,
    pub rosters: RosterStore,
    pub directed: DirectedPresenceRegistry,
    pub accounts: Arc<dyn AccountDirectory>,
    pub offline: Arc<dyn OfflineStore>,
    pub cluster: Arc<dyn ClusterBus>,
}

impl Aviary {
    pub fn new(
        config: Config,
        cache: Arc<dyn KeyedCache>,
        accounts: Arc<dyn AccountDirectory>,
        offline: Arc<dyn OfflineStore>,
        cluster: Arc<dyn ClusterBus>,
        remote_tx: mpsc::UnboundedSender<Stanza>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionManager::new(remote_tx),
            rosters: RosterStore::new(cache.clone()),
            directed: DirectedPresenceRegistry::new(cache),
            accounts,
            offline,
            cluster,
        })
    }

    /// Whether the address lives on a domain this node serves.
    pub fn is_local(&self, address: &Address) -> bool {
        self.accounts.is_local_domain(address.domain())
    }

    /// The server's own address (the bare domain).
    pub fn server_address(&self) -> Address {
        self.config.server.domain.clone()
    }

    /// Deliver a stanza to its target: local sessions directly, anything
    /// else through the remote routing sink.
    pub fn route(&self, to: &Address, stanza: Stanza) -> HandlerResult {
        if self.is_local(to) {
            self.sessions.deliver_local(to, stanza)
        } else {
            self.sessions.route_remote(stanza)
        }
    }

    /// Push a changed roster item to every session of its owner.
    ///
    /// Items in state None with an unanswered inbound subscribe are never
    /// pushed; the owner learns of them through the subscription request
    /// itself.
    pub fn push_item(&self, owner: &BareAddress, version: &str, item: &RosterItem, trigger: &str) {
        if !push_visible(item) {
            return;
        }
        let Some(username) = owner.local() else {
            return;
        };
        let push = RosterQuery {
            id: Uuid::new_v4().to_string(),
            from: None,
            to: Some(owner.to_address()),
            kind: RosterQueryKind::Push,
            items: vec![item.to_payload()],
            version: self
                .config
                .roster
                .versioning
                .then(|| version.to_owned()),
            error: None,
        };
        for session in self.sessions.sessions_for(username) {
            let push = RosterQuery {
                to: Some(session.address.clone()),
                ..push.clone()
            };
            if let Err(err) = session.deliver(Stanza::Roster(push)) {
                warn!(address = %session.address, %err, "roster push failed");
            }
        }
        metrics::record_roster_push(trigger);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::StaticDirectory;
    use crate::cache::MemoryCache;
    use crate::cluster::LocalBus;
    use crate::config::Config;
    use crate::offline::MemoryOfflineStore;
    use crate::roster::{RecvState, SubState};

    fn config() -> Config {
        toml::from_str(
            r#"
[server]
domain = "example.org"
"#,
        )
        .unwrap()
    }

    fn aviary(accounts: Vec<&str>) -> Arc<Aviary> {
        let (remote_tx, _remote_rx) = mpsc::unbounded_channel();
        Aviary::new(
            config(),
            Arc::new(MemoryCache::new()),
            Arc::new(StaticDirectory::new(
                "example.org",
                accounts.into_iter().map(String::from).collect(),
            )),
            Arc::new(MemoryOfflineStore::new()),
            Arc::new(LocalBus::new()),
            remote_tx,
        )
    }

    #[test]
    fn routing_splits_on_domain() {
        let state = aviary(vec!["alice"]);
        assert!(state.is_local(&"alice@example.org".parse().unwrap()));
        assert!(!state.is_local(&"alice@elsewhere.net".parse().unwrap()));
        assert_eq!(state.server_address().to_string(), "example.org");
    }

    #[test]
    fn push_skips_hidden_items() {
        let state = aviary(vec!["alice"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .sessions
            .register("alice@example.org/home".parse().unwrap(), tx)
            .unwrap();

        let owner: BareAddress = "alice@example.org".parse().unwrap();
        let mut item = RosterItem::new("bob@example.org".parse().unwrap());
        item.recv = RecvState::SubscribeReceived;
        state.push_item(&owner, "v1", &item, "test");
        assert!(rx.try_recv().is_err());

        item.sub = SubState::From;
        state.push_item(&owner, "v1", &item, "test");
        match rx.try_recv().unwrap() {
            Stanza::Roster(push) => {
                assert_eq!(push.kind, RosterQueryKind::Push);
                assert_eq!(push.version.as_deref(), Some("v1"));
                assert_eq!(push.items.len(), 1);
            }
            other => panic!("unexpected stanza: {other:?}"),
        }
    }
}
