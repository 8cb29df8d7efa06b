//! Presence stanzas.

use crate::address::Address;
use crate::error::ErrorCondition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a presence stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceKind {
    /// The sender is available. The wire has no explicit "available" type;
    /// the frontend maps an absent type attribute to this.
    Available,
    /// The sender went offline.
    Unavailable,
    /// Request to subscribe to the recipient's presence.
    Subscribe,
    /// Grant of a subscription request.
    Subscribed,
    /// Request to cancel an existing subscription.
    Unsubscribe,
    /// Revocation or denial of a subscription.
    Unsubscribed,
    /// Server-to-server query for a contact's current presence.
    Probe,
    /// Bounced presence carrying an error condition.
    Error,
}

impl PresenceKind {
    /// Whether this kind participates in subscription negotiation.
    pub const fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::Subscribe | Self::Subscribed | Self::Unsubscribe | Self::Unsubscribed
        )
    }
}

impl fmt::Display for PresenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Subscribe => "subscribe",
            Self::Subscribed => "subscribed",
            Self::Unsubscribe => "unsubscribe",
            Self::Unsubscribed => "unsubscribed",
            Self::Probe => "probe",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A presence stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Sender. Frontends stamp this from the session; subscription-type
    /// presences are re-stamped to the sender's bare address by the core.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<Address>,
    /// Recipient. Absent for broadcast availability updates.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<Address>,
    /// Stanza kind.
    pub kind: PresenceKind,
    /// Free-form status text ("away until lunch").
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    /// Error condition, present only on `kind == Error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorCondition>,
}

impl Presence {
    /// A plain available presence with no addressing.
    pub fn available() -> Self {
        Self {
            from: None,
            to: None,
            kind: PresenceKind::Available,
            status: None,
            error: None,
        }
    }

    /// An unavailable presence with no addressing.
    pub fn unavailable() -> Self {
        Self {
            kind: PresenceKind::Unavailable,
            ..Self::available()
        }
    }

    /// A subscription-negotiation presence from `from` to `to`.
    pub fn subscription(kind: PresenceKind, from: Address, to: Address) -> Self {
        debug_assert!(kind.is_subscription());
        Self {
            from: Some(from),
            to: Some(to),
            kind,
            status: None,
            error: None,
        }
    }

    /// A probe from `from` to `to`.
    pub fn probe(from: Address, to: Address) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            kind: PresenceKind::Probe,
            status: None,
            error: None,
        }
    }

    /// Replace the recipient, returning the modified stanza.
    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    /// Replace the sender, returning the modified stanza.
    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// Bounce this presence back as an error: from/to swapped, kind `Error`.
    pub fn into_error(self, condition: ErrorCondition) -> Self {
        Self {
            from: self.to,
            to: self.from,
            kind: PresenceKind::Error,
            status: None,
            error: Some(condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_kinds() {
        assert!(PresenceKind::Subscribe.is_subscription());
        assert!(PresenceKind::Unsubscribed.is_subscription());
        assert!(!PresenceKind::Available.is_subscription());
        assert!(!PresenceKind::Probe.is_subscription());
    }

    #[test]
    fn error_bounce_swaps_addressing() {
        let from: Address = "a@x.org".parse().unwrap();
        let to: Address = "b@x.org".parse().unwrap();
        let p = Presence::subscription(PresenceKind::Subscribe, from.clone(), to.clone());
        let bounced = p.into_error(ErrorCondition::BadRequest);
        assert_eq!(bounced.from, Some(to));
        assert_eq!(bounced.to, Some(from));
        assert_eq!(bounced.kind, PresenceKind::Error);
        assert_eq!(bounced.error, Some(ErrorCondition::BadRequest));
    }

    #[test]
    fn json_shape() {
        let p = Presence::available().with_from("a@x.org/web".parse().unwrap());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "available");
        assert_eq!(json["from"], "a@x.org/web");
        assert!(json.get("to").is_none());
    }
}
