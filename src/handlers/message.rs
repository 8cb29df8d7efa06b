//! Message routing. Messages are not this server's specialty, but they
//! are what makes the offline queue observable: a message for a local
//! user with no available session is queued and flooded at their next
//! session initialization.

use async_trait::async_trait;
use perch_proto::Stanza;

use super::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};

pub struct MessageHandler;

#[async_trait]
impl Handler for MessageHandler {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let Stanza::Message { to, body, .. } = stanza else {
            return Err(HandlerError::BadRequest("expected message".into()));
        };
        let stamped = Stanza::Message {
            from: ctx.session.address.clone(),
            to: to.clone(),
            body: body.clone(),
            delay: None,
        };

        if !ctx.state.is_local(to) {
            return ctx.state.sessions.route_remote(stamped);
        }
        let Some(user) = to.local() else {
            // Messages to the bare server address have no mailbox.
            return Err(HandlerError::NotAcceptable(
                "message addressed to the server".into(),
            ));
        };
        if ctx.state.sessions.available_sessions_for(user).is_empty() {
            ctx.state.offline.enqueue(user, stamped).await?;
            return Ok(());
        }
        ctx.state.sessions.deliver_local(to, stamped)
    }
}
