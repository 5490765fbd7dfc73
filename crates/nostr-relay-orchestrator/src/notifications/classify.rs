// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Notification classification

use std::fmt;

use nostr::prelude::*;

/// Generic repost (NIP-18)
const GENERIC_REPOST: u16 = 16;

/// Notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Reaction (kind 7)
    Reaction,
    /// Reply to one of my events
    Reply,
    /// Any other event tagging me
    Mention,
    /// Repost (kind 6 or 16)
    Repost,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reaction => f.write_str("reaction"),
            Self::Reply => f.write_str("reply"),
            Self::Mention => f.write_str("mention"),
            Self::Repost => f.write_str("repost"),
        }
    }
}

/// An event relevant to the current user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// ID of the originating event
    pub id: EventId,
    /// Type
    pub kind: NotificationKind,
    /// Originating event
    pub event: Event,
    /// Referenced event
    pub target: Option<EventId>,
}

impl Notification {
    /// Timestamp of the originating event
    #[inline]
    pub fn created_at(&self) -> Timestamp {
        self.event.created_at
    }
}

/// Classify an event addressed to `me`
///
/// Returns `None` for events authored by `me`.
pub fn classify(event: &Event, me: &PublicKey) -> Option<Notification> {
    if &event.pubkey == me {
        return None;
    }

    let target: Option<EventId> = target(event);

    let kind: NotificationKind = if event.kind == Kind::Reaction {
        NotificationKind::Reaction
    } else if event.kind == Kind::Repost || event.kind.as_u16() == GENERIC_REPOST {
        NotificationKind::Repost
    } else if event.kind == Kind::TextNote && target.is_some() {
        NotificationKind::Reply
    } else {
        NotificationKind::Mention
    };

    Some(Notification {
        id: event.id,
        kind,
        event: event.clone(),
        target,
    })
}

/// The `e` tag marked `reply`, otherwise the last `e` tag
fn target(event: &Event) -> Option<EventId> {
    let mut last: Option<EventId> = None;

    for tag in event.tags.iter() {
        let (id, marker) = match tag.as_slice() {
            [name, id] if name == "e" => (id, None),
            [name, id, _relay, marker, ..] if name == "e" => (id, Some(marker.as_str())),
            [name, id, ..] if name == "e" => (id, None),
            _ => continue,
        };

        let Ok(id) = EventId::from_hex(id) else {
            continue;
        };

        if marker == Some("reply") {
            return Some(id);
        }

        last = Some(id);
    }

    last
}
