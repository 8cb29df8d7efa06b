//! Stanza-level error conditions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error condition attached to a bounced stanza.
///
/// These are the semantic error conditions of the stanza contract; the
/// transport decides how to render them (XML error elements, JSON fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    /// The sender lacks permission for the operation.
    Forbidden,
    /// The stanza was structurally invalid (e.g. multiple roster items in
    /// one set, duplicate group names).
    BadRequest,
    /// A payload value was rejected (e.g. empty group name).
    NotAcceptable,
    /// The referenced roster entry does not exist.
    ItemNotFound,
    /// A server-side failure (storage, lock acquisition).
    InternalError,
    /// An address failed to parse.
    JidMalformed,
    /// The operation conflicts with existing state.
    Conflict,
}

impl ErrorCondition {
    /// Stable string form, used both on the wire and as a metric label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::BadRequest => "bad-request",
            Self::NotAcceptable => "not-acceptable",
            Self::ItemNotFound => "item-not-found",
            Self::InternalError => "internal-error",
            Self::JidMalformed => "jid-malformed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
