//! A single user's roster: the contact list plus its version tag.
//!
//! `Roster` is pure data. Locking lives in the store (one `RwLock` per
//! live roster), delivery lives in the server state; nothing here blocks
//! or does IO.

use perch_proto::BareAddress;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::item::{RecvState, RosterItem, SubState};
use super::transition::Delta;
use crate::error::{HandlerError, StoreError};

#[derive(Debug)]
pub struct Roster {
    owner: BareAddress,
    items: HashMap<BareAddress, RosterItem>,
    /// Content hash over the item set. Recomputed on every mutation, so
    /// equal versions imply equal rosters.
    version: String,
}

impl Roster {
    pub fn new(owner: BareAddress) -> Self {
        let mut roster = Self {
            owner,
            items: HashMap::new(),
            version: String::new(),
        };
        roster.recompute_version();
        roster
    }

    pub fn owner(&self) -> &BareAddress {
        &self.owner
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, contact: &BareAddress) -> Option<&RosterItem> {
        self.items.get(contact)
    }

    /// Snapshot of every item, unordered.
    pub fn all(&self) -> Vec<RosterItem> {
        self.items.values().cloned().collect()
    }

    /// Insert a brand-new item.
    pub fn create(&mut self, item: RosterItem) -> Result<(), HandlerError> {
        if self.items.contains_key(&item.address) {
            return Err(HandlerError::ItemExists(item.address.to_string()));
        }
        self.items.insert(item.address.clone(), item);
        self.recompute_version();
        Ok(())
    }

    /// Replace an existing item's nickname and groups. Subscription fields
    /// are state-machine territory and are left untouched.
    pub fn update_metadata(
        &mut self,
        contact: &BareAddress,
        nickname: Option<String>,
        groups: Vec<String>,
    ) -> Result<RosterItem, HandlerError> {
        let item = self
            .items
            .get_mut(contact)
            .ok_or_else(|| HandlerError::ItemNotFound(contact.to_string()))?;
        item.nickname = nickname;
        item.groups = groups;
        let item = item.clone();
        self.recompute_version();
        Ok(item)
    }

    /// Remove an item, returning it.
    pub fn delete(&mut self, contact: &BareAddress) -> Option<RosterItem> {
        let removed = self.items.remove(contact);
        if removed.is_some() {
            self.recompute_version();
        }
        removed
    }

    /// Run a state-machine delta against the contact's item.
    ///
    /// When the item is missing it is created at None/None/None first if
    /// `create` is set; otherwise the delta is silently discarded (grants
    /// and revocations from strangers never mint items). Returns the
    /// post-delta item when a change was applied and persisted.
    pub fn apply_delta(
        &mut self,
        contact: &BareAddress,
        delta: Delta,
        create: bool,
    ) -> Option<RosterItem> {
        if !self.items.contains_key(contact) {
            if !create || delta.is_noop() {
                return None;
            }
            self.items
                .insert(contact.clone(), RosterItem::new(contact.clone()));
        }
        let item = self.items.get_mut(contact)?;
        if delta.apply(item) {
            let item = item.clone();
            self.recompute_version();
            Some(item)
        } else {
            None
        }
    }

    /// Downgrade the contact's item to None/None/None. Returns the item
    /// when it existed and changed.
    pub fn downgrade(&mut self, contact: &BareAddress) -> Option<RosterItem> {
        let item = self.items.get_mut(contact)?;
        if item.sub == SubState::None
            && item.ask == super::item::AskState::None
            && item.recv == RecvState::None
        {
            return None;
        }
        item.downgrade();
        let item = item.clone();
        self.recompute_version();
        Some(item)
    }

    // ===== broadcast target computation =====

    /// Contacts entitled to the owner's presence (From or Both).
    pub fn presence_recipients(&self) -> Vec<BareAddress> {
        self.items
            .values()
            .filter(|i| i.sub.contact_sees_owner())
            .map(|i| i.address.clone())
            .collect()
    }

    /// Contacts whose presence the owner is entitled to (To or Both).
    pub fn probe_targets(&self) -> Vec<BareAddress> {
        self.items
            .values()
            .filter(|i| i.sub.sees_contact())
            .map(|i| i.address.clone())
            .collect()
    }

    /// Items carrying an unanswered inbound request, redelivered at
    /// session initialization.
    pub fn pending_requests(&self) -> Vec<(BareAddress, RecvState)> {
        self.items
            .values()
            .filter(|i| i.recv != RecvState::None)
            .map(|i| (i.address.clone(), i.recv))
            .collect()
    }

    /// Whether the contact may see the owner's broadcast presence.
    pub fn authorizes(&self, contact: &BareAddress) -> bool {
        self.items
            .get(contact)
            .is_some_and(|i| i.sub.contact_sees_owner())
    }

    fn recompute_version(&mut self) {
        let mut lines: Vec<String> = self
            .items
            .values()
            .map(|i| {
                format!(
                    "{}\t{}\t{:?}\t{:?}\t{}\t{}",
                    i.address,
                    i.sub,
                    i.ask,
                    i.recv,
                    i.nickname.as_deref().unwrap_or(""),
                    i.groups.join(",")
                )
            })
            .collect();
        lines.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(self.owner.to_string().as_bytes());
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let mut version = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(version, "{byte:02x}");
        }
        self.version = version;
    }

    // ===== persistence =====

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let items: Vec<&RosterItem> = self.items.values().collect();
        serde_json::to_vec(&items).map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub fn from_bytes(owner: BareAddress, bytes: &[u8]) -> Result<Self, StoreError> {
        let items: Vec<RosterItem> = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
            key: owner.to_string(),
            reason: e.to_string(),
        })?;
        let mut roster = Self::new(owner);
        roster.items = items.into_iter().map(|i| (i.address.clone(), i)).collect();
        roster.recompute_version();
        Ok(roster)
    }
}

/// Pushes for an item in state None with an unanswered inbound subscribe
/// are suppressed: the owner never asked for this entry and must not see
/// it until they answer the request.
pub fn push_visible(item: &RosterItem) -> bool {
    !(item.sub == SubState::None && item.recv == RecvState::SubscribeReceived)
}

#[cfg(test)]
mod tests {
    use super::super::item::AskState;
    use super::super::transition::{transition, Direction, SubscriptionKind};
    use super::*;

    fn owner() -> BareAddress {
        "alice@example.org".parse().unwrap()
    }

    fn contact(s: &str) -> BareAddress {
        s.parse().unwrap()
    }

    #[test]
    fn version_changes_only_on_content_change() {
        let mut roster = Roster::new(owner());
        let v0 = roster.version().to_owned();

        roster.create(RosterItem::new(contact("bob@example.org"))).unwrap();
        let v1 = roster.version().to_owned();
        assert_ne!(v0, v1);

        // A delta that changes nothing leaves the version alone.
        let noop = transition(SubState::None, Direction::Outbound, SubscriptionKind::Unsubscribe);
        assert!(roster.apply_delta(&contact("bob@example.org"), noop, false).is_none());
        assert_eq!(roster.version(), v1);

        roster.delete(&contact("bob@example.org"));
        assert_eq!(roster.version(), v0);
    }

    #[test]
    fn equal_content_means_equal_version() {
        let mut a = Roster::new(owner());
        let mut b = Roster::new(owner());
        // Insertion order must not matter.
        a.create(RosterItem::new(contact("x@e.org"))).unwrap();
        a.create(RosterItem::new(contact("y@e.org"))).unwrap();
        b.create(RosterItem::new(contact("y@e.org"))).unwrap();
        b.create(RosterItem::new(contact("x@e.org"))).unwrap();
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn apply_delta_respects_create_flag() {
        let mut roster = Roster::new(owner());
        let delta = transition(SubState::None, Direction::Inbound, SubscriptionKind::Subscribe);

        // Grant-like stanzas from strangers do not mint items.
        assert!(roster.apply_delta(&contact("bob@e.org"), delta, false).is_none());
        assert_eq!(roster.count(), 0);

        let item = roster.apply_delta(&contact("bob@e.org"), delta, true).unwrap();
        assert_eq!(item.recv, RecvState::SubscribeReceived);
        assert_eq!(roster.count(), 1);
    }

    #[test]
    fn recipient_sets_follow_sub_state() {
        let mut roster = Roster::new(owner());
        for (addr, sub) in [
            ("none@e.org", SubState::None),
            ("to@e.org", SubState::To),
            ("from@e.org", SubState::From),
            ("both@e.org", SubState::Both),
        ] {
            let mut item = RosterItem::new(contact(addr));
            item.sub = sub;
            roster.create(item).unwrap();
        }

        let mut recipients = roster.presence_recipients();
        recipients.sort();
        assert_eq!(recipients, vec![contact("both@e.org"), contact("from@e.org")]);

        let mut probes = roster.probe_targets();
        probes.sort();
        assert_eq!(probes, vec![contact("both@e.org"), contact("to@e.org")]);

        assert!(roster.authorizes(&contact("from@e.org")));
        assert!(!roster.authorizes(&contact("to@e.org")));
        assert!(!roster.authorizes(&contact("stranger@e.org")));
    }

    #[test]
    fn hidden_pending_items_are_not_pushed() {
        let mut item = RosterItem::new(contact("bob@e.org"));
        item.recv = RecvState::SubscribeReceived;
        assert!(!push_visible(&item));

        item.sub = SubState::From;
        assert!(push_visible(&item));

        let mut plain = RosterItem::new(contact("carol@e.org"));
        plain.ask = AskState::SubscribePending;
        assert!(push_visible(&plain));
    }

    #[test]
    fn snapshot_round_trips_with_stable_version() {
        let mut roster = Roster::new(owner());
        let mut item = RosterItem::new(contact("bob@e.org"));
        item.sub = SubState::Both;
        item.nickname = Some("Bob".into());
        item.groups = vec!["friends".into()];
        roster.create(item).unwrap();

        let bytes = roster.to_bytes().unwrap();
        let restored = Roster::from_bytes(owner(), &bytes).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.version(), roster.version());
        assert_eq!(
            restored.get(&contact("bob@e.org")).unwrap().nickname.as_deref(),
            Some("Bob")
        );
    }

    #[test]
    fn corrupt_snapshot_reports_owner_key() {
        let err = Roster::from_bytes(owner(), b"not json").unwrap_err();
        match err {
            StoreError::Corrupt { key, .. } => assert_eq!(key, "alice@example.org"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
