//! Rosters: contact lists, subscription state, and their persistence.

pub mod item;
pub mod roster;
pub mod store;
pub mod transition;

pub use item::{AskState, RecvState, RosterItem, SubState};
pub use roster::{push_visible, Roster};
pub use store::RosterStore;
pub use transition::{transition, Delta, Direction, SubscriptionKind};
