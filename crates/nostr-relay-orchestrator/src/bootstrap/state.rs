// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Bootstrap state

use std::collections::HashSet;
use std::fmt;

use nostr::prelude::*;

use crate::merge;
use crate::url::normalize_relay_url;

/// Bootstrap phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BootstrapPhase {
    /// Not started
    #[default]
    Idle,
    /// Waiting for indexer discovery
    DiscoveringIndexers,
    /// Asking the indexers for profile, relay list and contacts
    QueryingIndexers,
    /// Connecting the outbox and inbox relays
    ConnectingRelays,
    /// Done
    Ready,
    /// No indexer available
    Error,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::DiscoveringIndexers => f.write_str("discovering_indexers"),
            Self::QueryingIndexers => f.write_str("querying_indexers"),
            Self::ConnectingRelays => f.write_str("connecting_relays"),
            Self::Ready => f.write_str("ready"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl BootstrapPhase {
    /// Check if the phase is terminal
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

/// The slots filled by bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Slot {
    Profile,
    RelayList,
    Contacts,
}

impl Slot {
    pub(super) const ALL: [Self; 3] = [Self::Profile, Self::RelayList, Self::Contacts];

    pub(super) fn kind(&self) -> Kind {
        match self {
            Self::Profile => Kind::Metadata,
            Self::RelayList => Kind::RelayList,
            Self::Contacts => Kind::ContactList,
        }
    }

    pub(super) fn from_kind(kind: Kind) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.kind() == kind)
    }
}

/// Progress of a user's bootstrap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapState {
    /// User being bootstrapped
    pub public_key: Option<PublicKey>,
    /// Current phase
    pub phase: BootstrapPhase,
    /// Newest profile (kind 0)
    pub profile: Option<Event>,
    /// Newest relay list (kind 10002)
    pub relay_list: Option<Event>,
    /// Newest contact list (kind 3)
    pub contacts: Option<Event>,
    /// Indexers asked
    pub indexers_queried: usize,
    /// Indexers that sent `EOSE` or failed
    pub indexers_responded: usize,
    /// Outbox relays connected
    pub outbox_connected: usize,
    /// Inbox relays connected
    pub inbox_connected: usize,
    /// Followed public keys in the contact list
    pub following_count: usize,
    /// Reason of [`BootstrapPhase::Error`]
    pub error: Option<String>,
    /// Run that owns this state
    pub(super) run: u64,
}

impl BootstrapState {
    pub(super) fn new(run: u64, public_key: Option<PublicKey>) -> Self {
        Self {
            public_key,
            run,
            ..Default::default()
        }
    }

    /// Check if bootstrap completed successfully
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.phase == BootstrapPhase::Ready
    }

    /// Parsed profile
    pub fn metadata(&self) -> Option<Metadata> {
        let profile: &Event = self.profile.as_ref()?;
        Metadata::from_json(&profile.content).ok()
    }

    /// Declared relays, split by direction
    pub fn relays(&self) -> RelayListPartition {
        self.relay_list
            .as_ref()
            .map(RelayListPartition::from_event)
            .unwrap_or_default()
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Event> {
        match slot {
            Slot::Profile => &mut self.profile,
            Slot::RelayList => &mut self.relay_list,
            Slot::Contacts => &mut self.contacts,
        }
    }

    /// Newest-wins adoption
    ///
    /// Events of other authors, or of kinds without a slot, are ignored.
    /// Returns `true` if the event was adopted.
    pub(super) fn adopt(&mut self, public_key: &PublicKey, event: &Event) -> bool {
        if &event.pubkey != public_key {
            return false;
        }

        let Some(slot) = Slot::from_kind(event.kind) else {
            return false;
        };

        if !merge::offer(self.slot_mut(slot), event) {
            return false;
        }

        if slot == Slot::Contacts {
            self.following_count = following_count(event);
        }

        true
    }
}

/// Distinct public keys in the `p` tags of a contact list
pub fn following_count(contacts: &Event) -> usize {
    contacts
        .tags
        .iter()
        .filter_map(|tag| match tag.as_slice() {
            [name, value, ..] if name == "p" => PublicKey::from_hex(value).ok(),
            _ => None,
        })
        .collect::<HashSet<PublicKey>>()
        .len()
}

/// NIP-65 relay list, split by direction
///
/// <https://github.com/nostr-protocol/nips/blob/master/65.md>
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayListPartition {
    /// Write relays
    pub outbox: Vec<RelayUrl>,
    /// Read relays
    pub inbox: Vec<RelayUrl>,
}

impl RelayListPartition {
    /// Partition the `r` tags of a relay list
    ///
    /// A tag without marker counts as both read and write. Invalid URLs are skipped.
    pub fn from_event(event: &Event) -> Self {
        let mut partition = Self::default();

        for tag in event.tags.iter() {
            let (url, marker) = match tag.as_slice() {
                [name, url] if name == "r" => (url, None),
                [name, url, marker, ..] if name == "r" => (url, Some(marker.as_str())),
                _ => continue,
            };

            let Ok(url) = normalize_relay_url(url) else {
                continue;
            };

            let (write, read) = match marker {
                Some("write") => (true, false),
                Some("read") => (false, true),
                _ => (true, true),
            };

            if write && !partition.outbox.contains(&url) {
                partition.outbox.push(url.clone());
            }

            if read && !partition.inbox.contains(&url) {
                partition.inbox.push(url);
            }
        }

        partition
    }

    /// Outbox and inbox relays, without duplicates
    pub fn union(&self) -> Vec<RelayUrl> {
        let mut all: Vec<RelayUrl> = self.outbox.clone();
        for url in self.inbox.iter() {
            if !all.contains(url) {
                all.push(url.clone());
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{event_with_tags, tag};
    use crate::url::canonical_str;

    #[test]
    fn test_partition_relay_list() {
        let keys = Keys::generate();
        let event = event_with_tags(
            &keys,
            Kind::RelayList,
            "",
            10,
            [
                tag(&["r", "wss://write.relay", "write"]),
                tag(&["r", "wss://read.relay/", "read"]),
                tag(&["r", "wss://both.relay"]),
                tag(&["r", "https://not.a.relay"]),
                tag(&["p", &keys.public_key().to_hex()]),
            ],
        );

        let partition = RelayListPartition::from_event(&event);
        let outbox: Vec<&str> = partition.outbox.iter().map(canonical_str).collect();
        let inbox: Vec<&str> = partition.inbox.iter().map(canonical_str).collect();
        assert_eq!(outbox, vec!["wss://write.relay", "wss://both.relay"]);
        assert_eq!(inbox, vec!["wss://read.relay", "wss://both.relay"]);
        assert_eq!(partition.union().len(), 3);
    }

    #[test]
    fn test_adopt_checks_author_and_kind() {
        let user = Keys::generate();
        let other = Keys::generate();
        let mut state = BootstrapState::default();

        let foreign = event_with_tags(&other, Kind::Metadata, "{}", 100, []);
        assert!(!state.adopt(&user.public_key(), &foreign));

        let note = event_with_tags(&user, Kind::TextNote, "hi", 100, []);
        assert!(!state.adopt(&user.public_key(), &note));

        let profile = event_with_tags(&user, Kind::Metadata, r#"{"name":"alice"}"#, 100, []);
        assert!(state.adopt(&user.public_key(), &profile));
        assert_eq!(state.metadata().unwrap().name.as_deref(), Some("alice"));

        let older = event_with_tags(&user, Kind::Metadata, r#"{"name":"bob"}"#, 50, []);
        assert!(!state.adopt(&user.public_key(), &older));
        assert_eq!(state.metadata().unwrap().name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_following_count_dedups() {
        let user = Keys::generate();
        let a = Keys::generate().public_key().to_hex();
        let b = Keys::generate().public_key().to_hex();

        let contacts = event_with_tags(
            &user,
            Kind::ContactList,
            "",
            100,
            [tag(&["p", &a]), tag(&["p", &b]), tag(&["p", &a]), tag(&["p", "junk"])],
        );

        let mut state = BootstrapState::default();
        assert!(state.adopt(&user.public_key(), &contacts));
        assert_eq!(state.following_count, 2);
    }
}
