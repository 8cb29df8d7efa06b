//! Unified error handling for perchd.
//!
//! This module provides the error hierarchy for the presence core, with
//! stanza-condition mapping and metric labeling.

use perch_proto::{ErrorCondition, Stanza};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during stanza handling.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed stanza: {0}")]
    BadRequest(String),

    #[error("payload not acceptable: {0}")]
    NotAcceptable(String),

    #[error("operation not permitted")]
    Forbidden,

    #[error("roster item not found: {0}")]
    ItemNotFound(String),

    #[error("roster item already exists: {0}")]
    ItemExists(String),

    #[error("malformed address: {0}")]
    Malformed(#[from] perch_proto::AddressError),

    #[error("send error: {0}")]
    Send(#[from] mpsc::error::SendError<Stanza>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotAcceptable(_) => "not_acceptable",
            Self::Forbidden => "forbidden",
            Self::ItemNotFound(_) => "item_not_found",
            Self::ItemExists(_) => "conflict",
            Self::Malformed(_) => "jid_malformed",
            Self::Send(_) => "send_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Map to the stanza-level condition reported to the client.
    ///
    /// Returns `None` for errors that don't warrant a client-visible bounce
    /// (send failures: the session is already gone).
    pub fn condition(&self) -> Option<ErrorCondition> {
        match self {
            Self::BadRequest(_) => Some(ErrorCondition::BadRequest),
            Self::NotAcceptable(_) => Some(ErrorCondition::NotAcceptable),
            Self::Forbidden => Some(ErrorCondition::Forbidden),
            Self::ItemNotFound(_) => Some(ErrorCondition::ItemNotFound),
            Self::ItemExists(_) => Some(ErrorCondition::Conflict),
            Self::Malformed(_) => Some(ErrorCondition::JidMalformed),
            Self::Internal(_) => Some(ErrorCondition::InternalError),
            Self::Send(_) => None,
        }
    }
}

/// Result type for stanza handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors surfaced by the storage/cache façade.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache payload corrupt for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::Internal(e.to_string())
    }
}
