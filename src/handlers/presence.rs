//! Presence stanza handlers: availability, subscription negotiation,
//! probes.

use async_trait::async_trait;
use perch_proto::Stanza;

use super::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};

/// Available/unavailable presence. Broadcast when there is no target,
/// directed when there is one.
pub struct AvailabilityHandler;

#[async_trait]
impl Handler for AvailabilityHandler {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let Stanza::Presence(presence) = stanza else {
            return Err(HandlerError::BadRequest("expected presence".into()));
        };
        if presence.to.is_some() {
            ctx.router.directed(ctx.session, presence.clone()).await
        } else {
            ctx.router.broadcast(ctx.session, presence.clone()).await
        }
    }
}

/// subscribe / subscribed / unsubscribe / unsubscribed.
pub struct SubscriptionHandler;

#[async_trait]
impl Handler for SubscriptionHandler {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let Stanza::Presence(presence) = stanza else {
            return Err(HandlerError::BadRequest("expected presence".into()));
        };
        if presence.to.is_none() {
            return Err(HandlerError::BadRequest(
                "subscription stanza without target".into(),
            ));
        }
        // The sender is whoever holds the session, whatever the client
        // claims.
        let presence = presence.clone().with_from(ctx.session.address.clone());
        ctx.router.handle_subscription(presence).await
    }
}

/// Presence probes. Authorization is checked against the probed user's
/// roster, so a client asking about a stranger gets a forbidden bounce.
pub struct ProbeHandler;

#[async_trait]
impl Handler for ProbeHandler {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let Stanza::Presence(presence) = stanza else {
            return Err(HandlerError::BadRequest("expected presence".into()));
        };
        let presence = presence.clone().with_from(ctx.session.address.clone());
        ctx.router.handle_probe(presence).await
    }
}
