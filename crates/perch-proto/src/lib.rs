//! # perch-proto
//!
//! Stanza model for the Perch presence daemon.
//!
//! This crate deliberately knows nothing about transport framing or XML: it
//! models the *semantic* payload of the stanzas the presence core exchanges —
//! network addresses, presence updates, roster queries, and stanza-level error
//! conditions. The daemon frames these as line-delimited JSON; other frontends
//! can map them onto whatever wire format they speak.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod presence;
pub mod roster;

pub use address::{Address, AddressError, BareAddress};
pub use error::ErrorCondition;
pub use presence::{Presence, PresenceKind};
pub use roster::{AskMarker, RosterItemPayload, RosterQuery, RosterQueryKind, SubscriptionMarker};

use serde::{Deserialize, Serialize};

/// A semantic stanza exchanged between sessions and the server core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stanza", rename_all = "kebab-case")]
pub enum Stanza {
    /// Presence update, subscription negotiation, or probe.
    Presence(Presence),
    /// Roster get/set/result/push.
    Roster(RosterQuery),
    /// A message stanza. The presence core only ever *relays* these
    /// (offline-message flood at session initialization); it never
    /// inspects the body.
    Message {
        /// Sender address.
        from: Address,
        /// Recipient address.
        to: Address,
        /// Opaque message body.
        body: String,
        /// Original send time, stamped when delivery was delayed (offline
        /// queueing). Absent on live delivery.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        delay: Option<chrono::DateTime<chrono::Utc>>,
    },
}

impl Stanza {
    /// The sender of this stanza, if it carries one.
    pub fn from(&self) -> Option<&Address> {
        match self {
            Stanza::Presence(p) => p.from.as_ref(),
            Stanza::Roster(r) => r.from.as_ref(),
            Stanza::Message { from, .. } => Some(from),
        }
    }
}
