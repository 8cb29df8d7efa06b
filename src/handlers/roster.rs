//! Roster get/set handling: snapshot delivery with version validation,
//! item create/update, and removal with its cross-account bookkeeping.

use async_trait::async_trait;
use perch_proto::{
    BareAddress, Presence, PresenceKind, RosterItemPayload, RosterQuery, RosterQueryKind, Stanza,
    SubscriptionMarker,
};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};
use crate::metrics;
use crate::roster::{push_visible, RecvState, RosterItem};

pub struct RosterHandler;

#[async_trait]
impl Handler for RosterHandler {
    async fn handle(&self, ctx: &mut Context<'_>, stanza: &Stanza) -> HandlerResult {
        let Stanza::Roster(query) = stanza else {
            return Err(HandlerError::BadRequest("expected roster query".into()));
        };
        // Clients may only originate queries about their own roster.
        let owner = ctx.session.address.to_bare();
        if let Some(from) = &query.from {
            if from.to_bare() != owner {
                return Err(HandlerError::Forbidden);
            }
        }
        match query.kind {
            RosterQueryKind::Get => get(ctx, &owner, query).await,
            RosterQueryKind::Set => set(ctx, &owner, query).await,
            _ => Err(HandlerError::BadRequest(
                "clients send only get and set".into(),
            )),
        }
    }
}

async fn get(ctx: &Context<'_>, owner: &BareAddress, query: &RosterQuery) -> HandlerResult {
    let versioning = ctx.state.config.roster.versioning;
    let roster = ctx.state.rosters.roster(owner).await?;
    let (items, version) = {
        let guard = roster.read();
        let items: Vec<RosterItemPayload> = guard
            .all()
            .iter()
            .filter(|i| push_visible(i))
            .map(RosterItem::to_payload)
            .collect();
        (items, guard.version().to_owned())
    };

    // A client presenting the current version already has this roster.
    if versioning && query.version.as_deref() == Some(version.as_str()) {
        let mut ack = RosterQuery::ack(query);
        ack.version = Some(version);
        ctx.session.deliver(Stanza::Roster(ack))?;
        return Ok(());
    }

    let result = RosterQuery {
        id: query.id.clone(),
        from: None,
        to: Some(ctx.session.address.clone()),
        kind: RosterQueryKind::Result,
        items,
        version: versioning.then_some(version),
        error: None,
    };
    ctx.session.deliver(Stanza::Roster(result))?;

    // A roster in hand implies interest in the contacts on it.
    if ctx.session.is_available() {
        ctx.router.probe_contacts(ctx.session).await?;
    }
    Ok(())
}

async fn set(ctx: &Context<'_>, owner: &BareAddress, query: &RosterQuery) -> HandlerResult {
    if query.items.len() != 1 {
        return Err(HandlerError::BadRequest(
            "roster set must carry exactly one item".into(),
        ));
    }
    let payload = &query.items[0];
    if payload.address == *owner {
        return Err(HandlerError::NotAcceptable(
            "own address cannot be a roster item".into(),
        ));
    }

    let mut seen = HashSet::new();
    for group in &payload.groups {
        if group.trim().is_empty() {
            return Err(HandlerError::NotAcceptable("empty group name".into()));
        }
        if !seen.insert(group.as_str()) {
            return Err(HandlerError::BadRequest(format!(
                "duplicate group: {group}"
            )));
        }
    }

    if payload.subscription == Some(SubscriptionMarker::Remove) {
        remove(ctx, owner, query, &payload.address).await
    } else {
        upsert(ctx, owner, query, payload).await
    }
}

/// Create or update an item's nickname and groups. Subscription fields
/// never move here; that is the state machine's job.
async fn upsert(
    ctx: &Context<'_>,
    owner: &BareAddress,
    query: &RosterQuery,
    payload: &RosterItemPayload,
) -> HandlerResult {
    let _owner_lock = ctx.state.rosters.lock_owner(owner).await;
    let roster = ctx.state.rosters.roster(owner).await?;

    let (item, version) = {
        let mut guard = roster.write();
        let item = if guard.get(&payload.address).is_some() {
            guard.update_metadata(
                &payload.address,
                payload.nickname.clone(),
                payload.groups.clone(),
            )?
        } else {
            let mut item = RosterItem::new(payload.address.clone());
            item.nickname = payload.nickname.clone();
            item.groups = payload.groups.clone();
            guard.create(item.clone())?;
            item
        };
        (item, guard.version().to_owned())
    };
    ctx.state.rosters.save(&roster).await?;

    ctx.session.deliver(Stanza::Roster(RosterQuery::ack(query)))?;
    ctx.state.push_item(owner, &version, &item, "set");
    Ok(())
}

/// Delete an item: local removal, removal push, reciprocal-side cleanup,
/// and the farewell presences the contact is owed.
async fn remove(
    ctx: &Context<'_>,
    owner: &BareAddress,
    query: &RosterQuery,
    contact: &BareAddress,
) -> HandlerResult {
    let removed;
    let version;
    {
        let _owner_lock = ctx.state.rosters.lock_owner(owner).await;
        let roster = ctx.state.rosters.roster(owner).await?;
        {
            let mut guard = roster.write();
            removed = guard
                .delete(contact)
                .ok_or_else(|| HandlerError::ItemNotFound(contact.to_string()))?;
            version = guard.version().to_owned();
        }
        ctx.state.rosters.save(&roster).await?;
    }

    ctx.session.deliver(Stanza::Roster(RosterQuery::ack(query)))?;
    if push_visible(&removed) {
        push_removal(ctx, owner, &version, contact);
    }
    debug!(%owner, %contact, sub = %removed.sub, "roster item removed");

    // The contact loses whatever the item granted, in both directions.
    if ctx.state.accounts.is_local_account(&contact.to_address()) {
        reconcile_reciprocal(ctx, owner, contact).await?;
        farewell_presences(ctx, owner, contact, &removed, true)?;
    } else {
        farewell_presences(ctx, owner, contact, &removed, false)?;
        // The remote domain keeps its own roster; tell it to drop us.
        let removal = RosterQuery {
            id: Uuid::new_v4().to_string(),
            from: Some(owner.to_address()),
            to: Some(contact.to_address()),
            kind: RosterQueryKind::Set,
            items: vec![RosterItemPayload::remove(owner.clone())],
            version: None,
            error: None,
        };
        ctx.state.sessions.route_remote(Stanza::Roster(removal))?;
    }
    Ok(())
}

/// Apply the reciprocal-side rule on a local contact's roster: an entry
/// that only existed for an unanswered inbound subscribe is deleted,
/// anything else is downgraded to no subscription.
async fn reconcile_reciprocal(
    ctx: &Context<'_>,
    owner: &BareAddress,
    contact: &BareAddress,
) -> HandlerResult {
    let _contact_lock = ctx.state.rosters.lock_owner(contact).await;
    let roster = ctx.state.rosters.roster(contact).await?;

    enum Outcome {
        Deleted(RosterItem),
        Downgraded(RosterItem),
        Untouched,
    }

    let (outcome, version) = {
        let mut guard = roster.write();
        let outcome = match guard.get(owner) {
            Some(item) if item.recv == RecvState::SubscribeReceived => {
                let removed = guard.delete(owner).expect("item just observed");
                Outcome::Deleted(removed)
            }
            Some(_) => match guard.downgrade(owner) {
                Some(item) => Outcome::Downgraded(item),
                None => Outcome::Untouched,
            },
            None => Outcome::Untouched,
        };
        (outcome, guard.version().to_owned())
    };

    match &outcome {
        Outcome::Untouched => return Ok(()),
        Outcome::Deleted(removed) => {
            ctx.state.rosters.save(&roster).await?;
            if push_visible(removed) {
                push_removal(ctx, contact, &version, owner);
            }
        }
        Outcome::Downgraded(item) => {
            ctx.state.rosters.save(&roster).await?;
            ctx.state.push_item(contact, &version, item, "removal");
        }
    }
    Ok(())
}

/// Send the presences a deleted item implies: unsubscribe when the owner
/// was seeing the contact, unsubscribed plus an unavailable sweep when
/// the contact was seeing the owner.
///
/// For a local contact the reciprocal roster was already reconciled, so
/// these go straight to the contact's sessions instead of through the
/// state machine.
fn farewell_presences(
    ctx: &Context<'_>,
    owner: &BareAddress,
    contact: &BareAddress,
    removed: &RosterItem,
    contact_local: bool,
) -> HandlerResult {
    let mut kinds = Vec::new();
    if removed.sub.sees_contact() {
        kinds.push(PresenceKind::Unsubscribe);
    }
    if removed.sub.contact_sees_owner() {
        kinds.push(PresenceKind::Unsubscribed);
    }

    for kind in kinds {
        let presence =
            Presence::subscription(kind, owner.to_address(), contact.to_address());
        let stanza = Stanza::Presence(presence);
        let sent = if contact_local {
            ctx.state.sessions.deliver_local(&contact.to_address(), stanza)
        } else {
            ctx.state.sessions.route_remote(stanza)
        };
        if let Err(err) = sent {
            warn!(%contact, %err, "farewell presence delivery failed");
        }
    }

    if removed.sub.contact_sees_owner() {
        ctx.router
            .send_unavailable_from_sessions(owner, &contact.to_address())?;
    }
    Ok(())
}

/// Roster push carrying the remove marker, to every session of `owner`.
fn push_removal(ctx: &Context<'_>, owner: &BareAddress, version: &str, contact: &BareAddress) {
    let Some(user) = owner.local() else {
        return;
    };
    let push = RosterQuery {
        id: Uuid::new_v4().to_string(),
        from: None,
        to: Some(owner.to_address()),
        kind: RosterQueryKind::Push,
        items: vec![RosterItemPayload::remove(contact.clone())],
        version: ctx
            .state
            .config
            .roster
            .versioning
            .then(|| version.to_owned()),
        error: None,
    };
    for session in ctx.state.sessions.sessions_for(user) {
        let push = RosterQuery {
            to: Some(session.address.clone()),
            ..push.clone()
        };
        if let Err(err) = session.deliver(Stanza::Roster(push)) {
            warn!(address = %session.address, %err, "removal push failed");
        }
    }
    metrics::record_roster_push("removal");
}
