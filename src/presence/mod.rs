//! Presence: availability broadcast, directed presence, probes, and the
//! subscription negotiation flow.

pub mod directed;
pub mod router;

pub use directed::{DirectedPresence, DirectedPresenceRegistry};
pub use router::PresenceRouter;
