//! Presence routing: availability broadcast, directed presence, probes,
//! and the subscription negotiation flow.
//!
//! Every subscription stanza runs the pure state machine in
//! [`crate::roster::transition`] against each local side under that
//! owner's roster lock, persists and pushes the change, and only then
//! forwards the stanza. Forwarding a stanza the state machine rejected is
//! impossible by construction.

use perch_proto::{Address, BareAddress, ErrorCondition, Presence, PresenceKind, Stanza};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::metrics;
use crate::roster::{transition, Direction, RecvState, SubState, SubscriptionKind};
use crate::session::Session;
use crate::state::Aviary;

pub struct PresenceRouter {
    state: Arc<Aviary>,
}

/// What applying one side of a subscription stanza produced.
struct SideOutcome {
    /// The item changed, was persisted, and was pushed.
    changed: bool,
}

impl PresenceRouter {
    pub fn new(state: Arc<Aviary>) -> Self {
        Self { state }
    }

    // ===== availability =====

    /// Broadcast presence (no `to`): fan out to everyone subscribed to the
    /// sender, plus the sender's other sessions.
    pub async fn broadcast(&self, session: &Arc<Session>, presence: Presence) -> HandlerResult {
        let owner = session.address.to_bare();
        let presence = presence.with_from(session.address.clone());
        let available = presence.kind == PresenceKind::Available;
        if available {
            session.remember_presence(presence.clone());
        }

        let roster = self.state.rosters.roster(&owner).await?;
        let recipients = roster.read().presence_recipients();

        let mut fanout = 0usize;
        for contact in &recipients {
            let to = contact.to_address();
            let stanza = Stanza::Presence(presence.clone().with_to(to.clone()));
            if let Err(err) = self.state.route(&to, stanza) {
                warn!(%contact, %err, "presence broadcast delivery failed");
            }
            fanout += 1;
        }

        // A user's sessions see each other's presence.
        if let Some(user) = session.username() {
            for other in self.state.sessions.sessions_for(user) {
                if other.address == session.address {
                    continue;
                }
                let stanza =
                    Stanza::Presence(presence.clone().with_to(other.address.clone()));
                if let Err(err) = other.deliver(stanza) {
                    warn!(address = %other.address, %err, "sibling session delivery failed");
                }
                fanout += 1;
            }
        }
        metrics::record_fanout(fanout);

        if available {
            if session.mark_available() {
                self.initialize_session(session).await?;
            }
        } else {
            session.mark_unavailable();
            self.retract_directed(session, &presence).await?;
        }
        Ok(())
    }

    /// Send unavailable to every directed-presence receiver and drop the
    /// sender's registry entry.
    async fn retract_directed(&self, session: &Arc<Session>, presence: &Presence) -> HandlerResult {
        let receivers = self.state.directed.clear(&session.address).await?;
        for receiver in receivers {
            let stanza = Stanza::Presence(presence.clone().with_to(receiver.clone()));
            if let Err(err) = self.state.route(&receiver, stanza) {
                warn!(%receiver, %err, "directed retraction delivery failed");
            }
        }
        Ok(())
    }

    /// First-availability setup: redeliver unanswered subscription
    /// requests, probe the contacts the owner may see, and flood queued
    /// offline messages.
    async fn initialize_session(&self, session: &Arc<Session>) -> HandlerResult {
        let owner = session.address.to_bare();
        let roster = self.state.rosters.roster(&owner).await?;
        let pending = roster.read().pending_requests();

        for (contact, recv) in pending {
            let kind = match recv {
                RecvState::SubscribeReceived => PresenceKind::Subscribe,
                RecvState::UnsubscribeReceived => PresenceKind::Unsubscribe,
                RecvState::None => continue,
            };
            let request =
                Presence::subscription(kind, contact.to_address(), owner.to_address());
            session.deliver(Stanza::Presence(request))?;
        }

        self.probe_contacts(session).await?;

        if self.state.config.roster.offline_flood {
            if let Some(user) = session.username() {
                let queued = self.state.offline.drain(user).await?;
                if !queued.is_empty() {
                    debug!(address = %session.address, count = queued.len(), "offline flood");
                }
                for stanza in queued {
                    session.deliver(stanza)?;
                }
            }
        }
        Ok(())
    }

    /// Fetch current presence for every contact the session's owner is
    /// entitled to see: local contacts answered directly, remote ones
    /// probed through federation.
    pub async fn probe_contacts(&self, session: &Arc<Session>) -> HandlerResult {
        let owner = session.address.to_bare();
        let roster = self.state.rosters.roster(&owner).await?;
        let probes = roster.read().probe_targets();

        for contact in probes {
            let target = contact.to_address();
            if self.state.is_local(&target) {
                self.deliver_current_presence(&contact, &session.address)?;
            } else {
                let probe = Presence::probe(owner.to_address(), target);
                self.state.sessions.route_remote(Stanza::Presence(probe))?;
            }
        }
        Ok(())
    }

    /// Directed presence: availability sent straight to one recipient.
    pub async fn directed(&self, session: &Arc<Session>, presence: Presence) -> HandlerResult {
        let to = presence
            .to
            .clone()
            .ok_or_else(|| HandlerError::BadRequest("directed presence without target".into()))?;
        let presence = presence.with_from(session.address.clone());
        self.state.route(&to, Stanza::Presence(presence.clone()))?;

        match presence.kind {
            PresenceKind::Available => {
                // Track only receivers who cannot already see the sender
                // through a subscription.
                let owner = session.address.to_bare();
                let roster = self.state.rosters.roster(&owner).await?;
                let authorized = roster.read().authorizes(&to.to_bare());
                if !authorized {
                    self.state
                        .directed
                        .record(&session.address, session.address.clone(), to)
                        .await?;
                }
            }
            PresenceKind::Unavailable => {
                self.state
                    .directed
                    .retract(&session.address, &session.address, &to)
                    .await?;
            }
            other => {
                return Err(HandlerError::BadRequest(format!(
                    "{other} is not a directed availability kind"
                )));
            }
        }
        Ok(())
    }

    // ===== probes =====

    /// Answer a presence probe for a local user.
    pub async fn handle_probe(&self, presence: Presence) -> HandlerResult {
        let (Some(from), Some(to)) = (presence.from.clone(), presence.to.clone()) else {
            return Err(HandlerError::BadRequest("probe without addressing".into()));
        };
        if !self.state.is_local(&to) {
            return self.state.sessions.route_remote(Stanza::Presence(presence));
        }

        let target = to.to_bare();
        let roster = self.state.rosters.roster(&target).await?;
        let authorized = roster.read().authorizes(&from.to_bare());
        if !authorized {
            let bounce = presence.into_error(ErrorCondition::Forbidden);
            return self.state.route(&from, Stanza::Presence(bounce));
        }
        self.deliver_current_presence(&target, &from)
    }

    /// Send `target`'s current presence to `to`: one stanza per available
    /// session, or a single unavailable from the bare address.
    fn deliver_current_presence(&self, target: &BareAddress, to: &Address) -> HandlerResult {
        let Some(user) = target.local() else {
            return Ok(());
        };
        let available = self.state.sessions.available_sessions_for(user);
        if available.is_empty() {
            let stanza = Stanza::Presence(
                Presence::unavailable()
                    .with_from(target.to_address())
                    .with_to(to.clone()),
            );
            return self.state.route(to, stanza);
        }
        for session in available {
            // Replay the session's stored broadcast; status text included.
            let replay = session
                .presence()
                .unwrap_or_else(Presence::available)
                .with_from(session.address.clone())
                .with_to(to.clone());
            self.state.route(to, Stanza::Presence(replay))?;
        }
        Ok(())
    }

    // ===== subscription negotiation =====

    /// Process a subscription stanza between two parties, applying the
    /// state machine to every local side and forwarding toward the other
    /// party.
    pub async fn handle_subscription(&self, presence: Presence) -> HandlerResult {
        let kind = SubscriptionKind::from_presence(presence.kind).ok_or_else(|| {
            HandlerError::BadRequest(format!("{} is not a subscription kind", presence.kind))
        })?;
        let (Some(from), Some(to)) = (presence.from.clone(), presence.to.clone()) else {
            return Err(HandlerError::BadRequest(
                "subscription stanza without addressing".into(),
            ));
        };
        let sender = from.to_bare();
        let recipient = to.to_bare();

        // Addresses on subscription stanzas are stamped bare: subscription
        // state binds accounts, not sessions.
        let mut stamped = presence.clone();
        stamped.from = Some(sender.to_address());
        stamped.to = Some(recipient.to_address());

        // Subscribing to the server itself is answered with an immediate
        // denial instead of minting state.
        if recipient.local().is_none() && self.state.is_local(&to) {
            if kind == SubscriptionKind::Subscribe {
                let denial = Presence::subscription(
                    PresenceKind::Unsubscribed,
                    self.state.server_address(),
                    sender.to_address(),
                );
                self.state.route(&from, Stanza::Presence(denial))?;
            }
            return Ok(());
        }

        let sender_local = self.state.accounts.is_local_account(&sender.to_address());
        let recipient_local = self
            .state
            .accounts
            .is_local_account(&recipient.to_address());
        if self.state.is_local(&to) && !recipient_local {
            return Err(HandlerError::ItemNotFound(recipient.to_string()));
        }

        let mut forward = true;

        // A subscribe toward someone who already authorized the sender is
        // answered by existing state; nothing to ask the recipient.
        if kind == SubscriptionKind::Subscribe && recipient_local {
            let roster = self.state.rosters.roster(&recipient).await?;
            if roster
                .read()
                .get(&sender)
                .is_some_and(|i| i.sub.contact_sees_owner())
            {
                forward = false;
            }
        }

        // Only a subscribe can mint a roster item; grants, cancellations,
        // and denials referencing an unknown address leave the roster
        // untouched.
        let create = kind == SubscriptionKind::Subscribe;

        if sender_local {
            self.apply_side(&sender, &recipient, Direction::Outbound, kind, create)
                .await?;
        }
        if recipient_local {
            let inbound = self
                .apply_side(&recipient, &sender, Direction::Inbound, kind, create)
                .await?;
            // A grant that changed nothing on the recipient is noise.
            if kind == SubscriptionKind::Subscribed && !inbound.changed {
                forward = false;
            }
        }

        if forward {
            let target = recipient.to_address();
            self.state.route(&target, Stanza::Presence(stamped))?;

            match kind {
                // The new subscriber is entitled to the granter's current
                // presence right away.
                SubscriptionKind::Subscribed if sender_local => {
                    self.deliver_current_presence(&sender, &recipient.to_address())?;
                }
                // A revoked subscriber must stop seeing the revoker.
                SubscriptionKind::Unsubscribed if sender_local => {
                    self.send_unavailable_from_sessions(&sender, &recipient.to_address())?;
                }
                _ => {}
            }
        } else {
            debug!(%sender, %recipient, %kind, "subscription forward suppressed");
        }
        Ok(())
    }

    /// Apply the state machine to one owner's side of a subscription
    /// stanza: lock, transition, persist, push.
    async fn apply_side(
        &self,
        owner: &BareAddress,
        contact: &BareAddress,
        dir: Direction,
        kind: SubscriptionKind,
        create: bool,
    ) -> Result<SideOutcome, HandlerError> {
        let _owner_lock = self.state.rosters.lock_owner(owner).await;
        let roster = self.state.rosters.roster(owner).await?;

        let (changed, version) = {
            let mut guard = roster.write();
            let current = guard.get(contact).map(|i| i.sub).unwrap_or(SubState::None);
            let delta = transition(current, dir, kind);
            let changed = guard.apply_delta(contact, delta, create);
            (changed, guard.version().to_owned())
        };

        if let Some(item) = &changed {
            self.state.rosters.save(&roster).await?;
            self.state.push_item(owner, &version, item, "subscription");
        }
        Ok(SideOutcome {
            changed: changed.is_some(),
        })
    }

    /// Unavailable presence from each of the owner's available sessions to
    /// `to`, after a revocation.
    pub(crate) fn send_unavailable_from_sessions(
        &self,
        owner: &BareAddress,
        to: &Address,
    ) -> HandlerResult {
        let Some(user) = owner.local() else {
            return Ok(());
        };
        for session in self.state.sessions.available_sessions_for(user) {
            let stanza = Stanza::Presence(
                Presence::unavailable()
                    .with_from(session.address.clone())
                    .with_to(to.clone()),
            );
            self.state.route(to, stanza)?;
        }
        Ok(())
    }

    // ===== disconnect =====

    /// Abrupt or orderly session teardown. The unavailable broadcast runs
    /// at most once per session regardless of how many paths race here.
    pub async fn handle_disconnect(&self, session: &Arc<Session>) -> HandlerResult {
        if !session.begin_close() {
            return Ok(());
        }
        let farewell = if session.is_available() {
            self.broadcast(session, Presence::unavailable()).await
        } else {
            // Never-available sessions may still hold directed entries.
            self.retract_directed(
                session,
                &Presence::unavailable().with_from(session.address.clone()),
            )
            .await
        };
        // The closed flag is already set and nothing retries this path, so
        // the registry entry must go even when the farewell failed;
        // otherwise the full address can never rebind.
        self.state.sessions.unregister(&session.address);
        farewell
    }
}
