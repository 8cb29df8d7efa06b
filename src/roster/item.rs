//! Roster items: one subscription record between an owner and a contact.

use perch_proto::{AskMarker, BareAddress, RosterItemPayload, SubscriptionMarker};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription state of a roster item.
///
/// `Remove` exists only on the wire (`SubscriptionMarker::Remove`); stored
/// items are always one of these four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubState {
    /// No subscription in either direction.
    None,
    /// The owner sees the contact's presence.
    To,
    /// The contact sees the owner's presence.
    From,
    /// Mutual subscription.
    Both,
}

/// Outbound request the owner is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AskState {
    None,
    SubscribePending,
    UnsubscribePending,
}

/// Inbound request not yet acted on by the owner's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecvState {
    None,
    SubscribeReceived,
    UnsubscribeReceived,
}

impl SubState {
    /// Wire marker for this state.
    pub fn marker(&self) -> SubscriptionMarker {
        match self {
            Self::None => SubscriptionMarker::None,
            Self::To => SubscriptionMarker::To,
            Self::From => SubscriptionMarker::From,
            Self::Both => SubscriptionMarker::Both,
        }
    }

    /// Whether the owner receives the contact's presence.
    pub fn sees_contact(&self) -> bool {
        matches!(self, Self::To | Self::Both)
    }

    /// Whether the contact receives the owner's presence.
    pub fn contact_sees_owner(&self) -> bool {
        matches!(self, Self::From | Self::Both)
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::To => "to",
            Self::From => "from",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

/// A single subscription record between a roster owner and a contact.
///
/// Owned exclusively by a [`Roster`](super::Roster); the subscription fields
/// are mutated only through the state machine in
/// [`transition`](super::transition::transition) or replaced wholesale during
/// a validated roster set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// The contact's address (immutable identity of the item).
    pub address: BareAddress,
    /// Subscription state.
    pub sub: SubState,
    /// Pending outbound request.
    pub ask: AskState,
    /// Pending inbound request.
    pub recv: RecvState,
    /// Client-chosen display name.
    pub nickname: Option<String>,
    /// Group names. Validated at the set boundary: no empty names, no
    /// duplicates.
    pub groups: Vec<String>,
}

impl RosterItem {
    /// A fresh item at None/None/None.
    pub fn new(address: BareAddress) -> Self {
        Self {
            address,
            sub: SubState::None,
            ask: AskState::None,
            recv: RecvState::None,
            nickname: None,
            groups: Vec::new(),
        }
    }

    /// Render for a roster result or push.
    pub fn to_payload(&self) -> RosterItemPayload {
        RosterItemPayload {
            address: self.address.clone(),
            subscription: Some(self.sub.marker()),
            ask: match self.ask {
                AskState::None => None,
                AskState::SubscribePending => Some(AskMarker::Subscribe),
                AskState::UnsubscribePending => Some(AskMarker::Unsubscribe),
            },
            nickname: self.nickname.clone(),
            groups: self.groups.clone(),
        }
    }

    /// Downgrade to None/None/None, keeping nickname and groups.
    ///
    /// Used on the symmetric side of a cross-account removal when the entry
    /// itself should survive.
    pub fn downgrade(&mut self) {
        self.sub = SubState::None;
        self.ask = AskState::None;
        self.recv = RecvState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> BareAddress {
        s.parse().unwrap()
    }

    #[test]
    fn new_item_is_all_none() {
        let item = RosterItem::new(addr("a@x.org"));
        assert_eq!(item.sub, SubState::None);
        assert_eq!(item.ask, AskState::None);
        assert_eq!(item.recv, RecvState::None);
    }

    #[test]
    fn visibility_helpers() {
        assert!(SubState::To.sees_contact());
        assert!(SubState::Both.sees_contact());
        assert!(!SubState::From.sees_contact());
        assert!(SubState::From.contact_sees_owner());
        assert!(!SubState::To.contact_sees_owner());
    }

    #[test]
    fn payload_omits_none_ask() {
        let mut item = RosterItem::new(addr("a@x.org"));
        assert_eq!(item.to_payload().ask, None);
        item.ask = AskState::SubscribePending;
        assert_eq!(item.to_payload().ask, Some(AskMarker::Subscribe));
    }

    #[test]
    fn downgrade_keeps_metadata() {
        let mut item = RosterItem::new(addr("a@x.org"));
        item.sub = SubState::Both;
        item.nickname = Some("Ally".into());
        item.groups = vec!["friends".into()];
        item.downgrade();
        assert_eq!(item.sub, SubState::None);
        assert_eq!(item.nickname.as_deref(), Some("Ally"));
        assert_eq!(item.groups, vec!["friends".to_string()]);
    }
}
