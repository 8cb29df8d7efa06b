//! The subscription state machine.
//!
//! A pure, total function over (current subscription state, direction,
//! stanza kind). The original encoding as nested hash tables could silently
//! miss a cell; the exhaustive `match` here makes the compiler prove every
//! cell is covered.
//!
//! The shape of the table: `subscribe`/`subscribed` only ever grow visibility
//! (None -> To/From -> Both), `unsubscribe`/`unsubscribed` only ever shrink
//! it, and the advisory ask/recv flags are cleared once the negotiation they
//! track resolves.

use super::item::{AskState, RecvState, RosterItem, SubState};
use perch_proto::PresenceKind;

/// Who sent the stanza, relative to the roster owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The roster owner is the stanza's sender.
    Outbound,
    /// The contact is the sender.
    Inbound,
}

/// The four presence kinds that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
}

impl SubscriptionKind {
    /// Narrow a presence kind to a subscription kind.
    pub fn from_presence(kind: PresenceKind) -> Option<Self> {
        match kind {
            PresenceKind::Subscribe => Some(Self::Subscribe),
            PresenceKind::Subscribed => Some(Self::Subscribed),
            PresenceKind::Unsubscribe => Some(Self::Unsubscribe),
            PresenceKind::Unsubscribed => Some(Self::Unsubscribed),
            _ => None,
        }
    }

    /// The presence kind this subscription kind corresponds to.
    pub fn presence_kind(&self) -> PresenceKind {
        match self {
            Self::Subscribe => PresenceKind::Subscribe,
            Self::Subscribed => PresenceKind::Subscribed,
            Self::Unsubscribe => PresenceKind::Unsubscribe,
            Self::Unsubscribed => PresenceKind::Unsubscribed,
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.presence_kind().fmt(f)
    }
}

/// Field changes produced by a transition. `None` means leave unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delta {
    pub recv: Option<RecvState>,
    pub sub: Option<SubState>,
    pub ask: Option<AskState>,
}

impl Delta {
    const UNCHANGED: Delta = Delta {
        recv: None,
        sub: None,
        ask: None,
    };

    /// Whether the delta changes nothing.
    pub fn is_noop(&self) -> bool {
        self.recv.is_none() && self.sub.is_none() && self.ask.is_none()
    }

    /// Apply to an item, returning true if any field actually changed.
    pub fn apply(&self, item: &mut RosterItem) -> bool {
        let mut changed = false;
        if let Some(recv) = self.recv {
            if item.recv != recv {
                item.recv = recv;
                changed = true;
            }
        }
        if let Some(sub) = self.sub {
            if item.sub != sub {
                item.sub = sub;
                changed = true;
            }
        }
        if let Some(ask) = self.ask {
            if item.ask != ask {
                item.ask = ask;
                changed = true;
            }
        }
        changed
    }
}

/// Compute the field deltas for a subscription stanza against an item in
/// state `sub`.
///
/// Deterministic and side-effect-free; callers apply the delta under the
/// owning roster's lock, persist, and only then forward the stanza.
pub fn transition(sub: SubState, dir: Direction, kind: SubscriptionKind) -> Delta {
    use AskState as A;
    use Direction::{Inbound, Outbound};
    use RecvState as R;
    use SubState as S;
    use SubscriptionKind::{Subscribe, Subscribed, Unsubscribe, Unsubscribed};

    match (sub, dir, kind) {
        // Owner begins a subscription negotiation.
        (S::None, Outbound, Subscribe) => Delta {
            ask: Some(A::SubscribePending),
            ..Delta::UNCHANGED
        },
        // Owner grants the contact's request: None -> From.
        (S::None, Outbound, Subscribed) => Delta {
            recv: Some(R::None),
            sub: Some(S::From),
            ..Delta::UNCHANGED
        },
        // Nothing to unsubscribe from.
        (S::None, Outbound, Unsubscribe) => Delta::UNCHANGED,
        // Owner denies the contact's request.
        (S::None, Outbound, Unsubscribed) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        // Contact wants to subscribe; surface it to the owner's client.
        (S::None, Inbound, Subscribe) => Delta {
            recv: Some(R::SubscribeReceived),
            ..Delta::UNCHANGED
        },
        // Contact granted our request: None -> To.
        (S::None, Inbound, Subscribed) => Delta {
            sub: Some(S::To),
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        (S::None, Inbound, Unsubscribe) => Delta::UNCHANGED,
        // Contact denied our request.
        (S::None, Inbound, Unsubscribed) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },

        // Owner asks for the mutual direction.
        (S::From, Outbound, Subscribe) => Delta {
            ask: Some(A::SubscribePending),
            ..Delta::UNCHANGED
        },
        // Re-grant (the earlier subscribed may have been lost).
        (S::From, Outbound, Subscribed) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        (S::From, Outbound, Unsubscribe) => Delta::UNCHANGED,
        // Owner revokes the contact's subscription: From -> None.
        (S::From, Outbound, Unsubscribed) => Delta {
            recv: Some(R::None),
            sub: Some(S::None),
            ..Delta::UNCHANGED
        },
        // Contact re-requests a subscription it already holds.
        (S::From, Inbound, Subscribe) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        // Contact grants the mutual direction: From -> Both.
        (S::From, Inbound, Subscribed) => Delta {
            sub: Some(S::Both),
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        // Contact wants out; surface it to the owner's client.
        (S::From, Inbound, Unsubscribe) => Delta {
            recv: Some(R::UnsubscribeReceived),
            ..Delta::UNCHANGED
        },
        (S::From, Inbound, Unsubscribed) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },

        // Already subscribed; may be cancelling a pending unsubscribe.
        (S::To, Outbound, Subscribe) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        // Owner grants the mutual direction: To -> Both.
        (S::To, Outbound, Subscribed) => Delta {
            recv: Some(R::None),
            sub: Some(S::Both),
            ..Delta::UNCHANGED
        },
        // Normal way of dropping our subscription.
        (S::To, Outbound, Unsubscribe) => Delta {
            ask: Some(A::UnsubscribePending),
            ..Delta::UNCHANGED
        },
        (S::To, Outbound, Unsubscribed) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        (S::To, Inbound, Subscribe) => Delta {
            recv: Some(R::SubscribeReceived),
            ..Delta::UNCHANGED
        },
        // Redundant grant or a lost-packet retransmit.
        (S::To, Inbound, Subscribed) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        (S::To, Inbound, Unsubscribe) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        // Contact revokes our subscription: To -> None.
        (S::To, Inbound, Unsubscribed) => Delta {
            sub: Some(S::None),
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },

        (S::Both, Outbound, Subscribe) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        (S::Both, Outbound, Subscribed) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        // Owner drops its own direction: flags only until answered.
        (S::Both, Outbound, Unsubscribe) => Delta {
            ask: Some(A::UnsubscribePending),
            ..Delta::UNCHANGED
        },
        // Owner revokes the contact's direction: Both -> To.
        (S::Both, Outbound, Unsubscribed) => Delta {
            recv: Some(R::None),
            sub: Some(S::To),
            ..Delta::UNCHANGED
        },
        (S::Both, Inbound, Subscribe) => Delta {
            recv: Some(R::None),
            ..Delta::UNCHANGED
        },
        (S::Both, Inbound, Subscribed) => Delta {
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
        // Contact drops its own direction; surface to the owner's client.
        (S::Both, Inbound, Unsubscribe) => Delta {
            recv: Some(R::UnsubscribeReceived),
            ..Delta::UNCHANGED
        },
        // Contact revokes our direction: Both -> From.
        (S::Both, Inbound, Unsubscribed) => Delta {
            recv: Some(R::None),
            sub: Some(S::From),
            ask: Some(A::None),
            ..Delta::UNCHANGED
        },
    }
}
