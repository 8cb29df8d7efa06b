//! Stanza handlers.
//!
//! The Handler trait and registry dispatch incoming stanzas from a client
//! session to the appropriate handler. Dispatch is keyed on a coarse
//! stanza kind so the registry stays a flat table like the rest of the
//! routing code.

mod message;
mod presence;
mod roster;

pub use message::MessageHandler;
pub use presence::{AvailabilityHandler, ProbeHandler, SubscriptionHandler};
pub use roster::RosterHandler;

use async_trait::async_trait;
use perch_proto::{PresenceKind, Stanza};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

use crate::error::{HandlerError, HandlerResult};
use crate::metrics;
use crate::presence::PresenceRouter;
use crate::session::Session;
use crate::state::Aviary;
use crate::telemetry::{spans, StanzaTimer};

/// Handler context passed to each stanza handler.
pub struct Context<'a> {
    /// The session that sent the stanza.
    pub session: &'a Arc<Session>,
    /// Shared server state.
    pub state: &'a Arc<Aviary>,
    /// Presence routing engine.
    pub router: &'a Arc<PresenceRouter>,
}

/// Trait implemented by all stanza handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult;
}

/// Coarse dispatch key for a stanza.
pub fn dispatch_key(stanza: &Stanza) -> &'static str {
    match stanza {
        Stanza::Presence(p) => match p.kind {
            PresenceKind::Available | PresenceKind::Unavailable => "availability",
            PresenceKind::Probe => "probe",
            PresenceKind::Error => "presence-error",
            _ => "subscription",
        },
        Stanza::Roster(_) => "roster",
        Stanza::Message { .. } => "message",
    }
}

/// Registry of stanza handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Registry {
    /// Create a new registry with all handlers registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

        handlers.insert("availability", Box::new(AvailabilityHandler));
        handlers.insert("subscription", Box::new(SubscriptionHandler));
        handlers.insert("probe", Box::new(ProbeHandler));
        handlers.insert("roster", Box::new(RosterHandler));
        handlers.insert("message", Box::new(MessageHandler));

        Self { handlers }
    }

    /// Dispatch a stanza to the appropriate handler.
    pub async fn dispatch(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let kind = dispatch_key(stanza);
        let Some(handler) = self.handlers.get(kind) else {
            // Echoed error stanzas from clients are dropped.
            return Ok(());
        };

        let span = spans::stanza(kind, &ctx.session.address.to_string());
        let _timer = StanzaTimer::new(kind);
        let result = handler.handle(ctx, stanza).instrument(span).await;
        if let Err(err) = &result {
            metrics::record_stanza_error(kind, err.error_code());
        }
        result
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the bounce stanza for a failed dispatch, when the error maps to
/// a stanza-level condition.
pub fn bounce_for(stanza: &Stanza, err: &HandlerError) -> Option<Stanza> {
    let condition = err.condition()?;
    match stanza {
        Stanza::Presence(p) => Some(Stanza::Presence(p.clone().into_error(condition))),
        Stanza::Roster(q) => Some(Stanza::Roster(perch_proto::RosterQuery::error(q, condition))),
        Stanza::Message { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_proto::Presence;

    #[test]
    fn dispatch_keys_cover_presence_kinds() {
        let p = |kind| {
            Stanza::Presence(Presence {
                from: None,
                to: None,
                kind,
                status: None,
                error: None,
            })
        };
        assert_eq!(dispatch_key(&p(PresenceKind::Available)), "availability");
        assert_eq!(dispatch_key(&p(PresenceKind::Unavailable)), "availability");
        assert_eq!(dispatch_key(&p(PresenceKind::Subscribe)), "subscription");
        assert_eq!(dispatch_key(&p(PresenceKind::Unsubscribed)), "subscription");
        assert_eq!(dispatch_key(&p(PresenceKind::Probe)), "probe");
    }

    #[test]
    fn bounce_preserves_addressing() {
        let stanza = Stanza::Presence(Presence::subscription(
            PresenceKind::Subscribe,
            "a@x.org".parse().unwrap(),
            "b@x.org".parse().unwrap(),
        ));
        let err = HandlerError::Forbidden;
        match bounce_for(&stanza, &err) {
            Some(Stanza::Presence(p)) => {
                assert_eq!(p.kind, PresenceKind::Error);
                assert_eq!(p.to, Some("a@x.org".parse().unwrap()));
            }
            other => panic!("unexpected bounce: {other:?}"),
        }
    }

    #[test]
    fn send_errors_do_not_bounce() {
        let stanza = Stanza::Presence(Presence::available());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Stanza>();
        drop(rx);
        let err = tx.send(Stanza::Presence(Presence::available())).unwrap_err();
        assert!(bounce_for(&stanza, &HandlerError::Send(err)).is_none());
    }
}
