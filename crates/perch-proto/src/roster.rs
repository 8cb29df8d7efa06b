//! Roster query stanzas (the IQ roster contract).

use crate::address::{Address, BareAddress};
use crate::error::ErrorCondition;
use serde::{Deserialize, Serialize};

/// Subscription state as rendered on the wire.
///
/// `Remove` is a request marker only: it instructs the server to delete the
/// item and is never stored or echoed as a persistent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionMarker {
    /// No subscription in either direction.
    None,
    /// The owner receives the contact's presence.
    To,
    /// The contact receives the owner's presence.
    From,
    /// Mutual subscription.
    Both,
    /// Delete marker (requests only).
    Remove,
}

/// Pending-request marker as rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AskMarker {
    /// An outbound subscribe is awaiting the contact's answer.
    Subscribe,
    /// An outbound unsubscribe is awaiting the contact's answer.
    Unsubscribe,
}

/// One item in a roster query payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItemPayload {
    /// The contact's bare address.
    pub address: BareAddress,
    /// Subscription state (or the `remove` marker in a set).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subscription: Option<SubscriptionMarker>,
    /// Pending outbound request, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ask: Option<AskMarker>,
    /// Client-chosen display name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nickname: Option<String>,
    /// Group names the item is filed under.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub groups: Vec<String>,
}

impl RosterItemPayload {
    /// A bare item with just an address (convenience for sets).
    pub fn new(address: BareAddress) -> Self {
        Self {
            address,
            subscription: None,
            ask: None,
            nickname: None,
            groups: Vec::new(),
        }
    }

    /// A removal request for the given address.
    pub fn remove(address: BareAddress) -> Self {
        Self {
            subscription: Some(SubscriptionMarker::Remove),
            ..Self::new(address)
        }
    }
}

/// The operation a roster query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RosterQueryKind {
    /// Client requests its roster.
    Get,
    /// Client mutates its roster.
    Set,
    /// Server answers a get/set.
    Result,
    /// Unsolicited server push of a changed item.
    Push,
    /// Bounced query carrying an error condition.
    Error,
}

/// A roster query stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterQuery {
    /// Correlation id echoed on the result.
    pub id: String,
    /// Sender (stamped by the session layer).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<Address>,
    /// Recipient, for pushes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<Address>,
    /// Operation.
    pub kind: RosterQueryKind,
    /// Item payload. Empty on a plain get or an empty acknowledgement.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub items: Vec<RosterItemPayload>,
    /// Roster version tag: sent by the client on get for cache validation,
    /// returned by the server on results and pushes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Error condition, present only on `kind == Error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorCondition>,
}

impl RosterQuery {
    /// An empty result acknowledging `request`.
    pub fn ack(request: &RosterQuery) -> Self {
        Self {
            id: request.id.clone(),
            from: None,
            to: request.from.clone(),
            kind: RosterQueryKind::Result,
            items: Vec::new(),
            version: None,
            error: None,
        }
    }

    /// Bounce `request` back with an error condition.
    pub fn error(request: &RosterQuery, condition: ErrorCondition) -> Self {
        Self {
            id: request.id.clone(),
            from: None,
            to: request.from.clone(),
            kind: RosterQueryKind::Error,
            items: request.items.clone(),
            version: None,
            error: Some(condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_marker_round_trips() {
        let item = RosterItemPayload::remove("x@y.org".parse().unwrap());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["subscription"], "remove");
        let back: RosterItemPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.subscription, Some(SubscriptionMarker::Remove));
    }

    #[test]
    fn ack_echoes_id_and_targets_requester() {
        let req = RosterQuery {
            id: "q1".into(),
            from: Some("a@x.org/web".parse().unwrap()),
            to: None,
            kind: RosterQueryKind::Get,
            items: Vec::new(),
            version: Some("v0".into()),
            error: None,
        };
        let ack = RosterQuery::ack(&req);
        assert_eq!(ack.id, "q1");
        assert_eq!(ack.to, req.from);
        assert_eq!(ack.kind, RosterQueryKind::Result);
        assert!(ack.items.is_empty());
    }

    #[test]
    fn error_carries_condition() {
        let req = RosterQuery {
            id: "q2".into(),
            from: None,
            to: None,
            kind: RosterQueryKind::Set,
            items: vec![RosterItemPayload::new("x@y.org".parse().unwrap())],
            version: None,
            error: None,
        };
        let err = RosterQuery::error(&req, ErrorCondition::NotAcceptable);
        assert_eq!(err.kind, RosterQueryKind::Error);
        assert_eq!(err.error, Some(ErrorCondition::NotAcceptable));
        assert_eq!(err.items.len(), 1);
    }
}
