//! Session registry.
//!
//! Tracks every connected client session, routes stanzas to local sessions
//! by bare or full address, and hands anything nonlocal to the remote
//! routing sink. Unavailable handling on disconnect runs exactly once per
//! session no matter how the connection dies.

use dashmap::DashMap;
use parking_lot::RwLock;
use perch_proto::{Address, Presence, Stanza};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::metrics;

/// One connected client.
#[derive(Debug)]
pub struct Session {
    pub address: Address,
    tx: mpsc::UnboundedSender<Stanza>,
    /// Set once the session sends its first available presence.
    available: AtomicBool,
    /// The availability this session last broadcast, replayed when a
    /// probe or fresh grant fetches its presence.
    last_presence: RwLock<Option<Presence>>,
    /// Guards the once-only disconnect path.
    closed: AtomicBool,
}

impl Session {
    /// Queue a stanza for this session's writer task.
    pub fn deliver(&self, stanza: Stanza) -> HandlerResult {
        self.tx.send(stanza)?;
        Ok(())
    }

    /// Mark the session available. Returns true the first time, which is
    /// the signal to run session initialization.
    pub fn mark_available(&self) -> bool {
        !self.available.swap(true, Ordering::SeqCst)
    }

    pub fn mark_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.last_presence.write().take();
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Remember the broadcast availability so later fetches see the
    /// session's actual status text instead of a bare available.
    pub fn remember_presence(&self, presence: Presence) {
        *self.last_presence.write() = Some(presence);
    }

    /// The last broadcast availability, gone again once the session
    /// goes unavailable.
    pub fn presence(&self) -> Option<Presence> {
        self.last_presence.read().clone()
    }

    /// Flip the closed flag. Returns true for the caller that won the
    /// race and should run unavailable handling.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// The session owner's username, when it has one.
    pub fn username(&self) -> Option<&str> {
        self.address.local()
    }
}

/// Registry of live sessions plus the sink for nonlocal stanzas.
pub struct SessionManager {
    /// Full address string -> session.
    sessions: DashMap<String, Arc<Session>>,
    /// Username -> full address strings of that user's sessions.
    by_user: DashMap<String, HashSet<String>>,
    /// Stanzas addressed outside the local domain go here.
    remote_tx: mpsc::UnboundedSender<Stanza>,
}

impl SessionManager {
    pub fn new(remote_tx: mpsc::UnboundedSender<Stanza>) -> Self {
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            remote_tx,
        }
    }

    /// Bind a new session. Fails with `conflict` if the full address is
    /// already bound.
    pub fn register(
        &self,
        address: Address,
        tx: mpsc::UnboundedSender<Stanza>,
    ) -> Result<Arc<Session>, HandlerError> {
        let key = address.to_string();
        let session = Arc::new(Session {
            address: address.clone(),
            tx,
            available: AtomicBool::new(false),
            last_presence: RwLock::new(None),
            closed: AtomicBool::new(false),
        });
        match self.sessions.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(HandlerError::ItemExists(key));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }
        if let Some(user) = address.local() {
            self.by_user.entry(user.to_owned()).or_default().insert(key);
        }
        metrics::inc_sessions();
        debug!(address = %address, "session bound");
        Ok(session)
    }

    /// Drop a session from the registry. Idempotent.
    pub fn unregister(&self, address: &Address) {
        let key = address.to_string();
        if self.sessions.remove(&key).is_none() {
            return;
        }
        if let Some(user) = address.local() {
            if let Some(mut set) = self.by_user.get_mut(user) {
                set.remove(&key);
                let empty = set.is_empty();
                drop(set);
                if empty {
                    self.by_user.remove_if(user, |_, set| set.is_empty());
                }
            }
        }
        metrics::dec_sessions();
        debug!(address = %address, "session unbound");
    }

    /// Exact-match lookup by full address.
    pub fn session(&self, address: &Address) -> Option<Arc<Session>> {
        self.sessions.get(&address.to_string()).map(|s| s.clone())
    }

    /// Every live session of a local user.
    pub fn sessions_for(&self, username: &str) -> Vec<Arc<Session>> {
        let Some(keys) = self.by_user.get(username) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|k| self.sessions.get(k).map(|s| s.clone()))
            .collect()
    }

    /// Sessions of `username` that have announced availability.
    pub fn available_sessions_for(&self, username: &str) -> Vec<Arc<Session>> {
        self.sessions_for(username)
            .into_iter()
            .filter(|s| s.is_available())
            .collect()
    }

    /// Deliver to every session of a local user. A full target address
    /// narrows delivery to that one session when it exists, falling back
    /// to all sessions when it does not.
    pub fn deliver_local(&self, to: &Address, stanza: Stanza) -> HandlerResult {
        let Some(user) = to.local() else {
            return Ok(());
        };
        if to.resource().is_some() {
            if let Some(session) = self.session(to) {
                return session.deliver(stanza);
            }
        }
        for session in self.sessions_for(user) {
            if let Err(err) = session.deliver(stanza.clone()) {
                warn!(address = %session.address, %err, "delivery to dead session");
            }
        }
        Ok(())
    }

    /// Hand a stanza to the federation sink.
    pub fn route_remote(&self, stanza: Stanza) -> HandlerResult {
        self.remote_tx
            .send(stanza)
            .map_err(|e| HandlerError::Internal(format!("remote route closed: {e}")))
    }
}
