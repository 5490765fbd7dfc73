// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Newest-wins merge
//!
//! Profiles, relay lists and contact lists are replaceable: many sources may answer for the
//! same slot, in any order. The retained event is always the one with the highest
//! `created_at`; on equal timestamps the lowest event ID wins, so the result never depends on
//! arrival order.

use std::cmp::Ordering;

use nostr::Event;

/// Compare two candidates for the same slot: [`Ordering::Greater`] means `a` wins.
pub fn compare(a: &Event, b: &Event) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Check if `candidate` should replace `current`
#[inline]
pub fn is_newer(candidate: &Event, current: &Event) -> bool {
    compare(candidate, current) == Ordering::Greater
}

/// Offer a candidate to a slot holding the newest event seen so far
///
/// Returns `true` if the candidate was adopted.
pub fn offer(slot: &mut Option<Event>, event: &Event) -> bool {
    match slot {
        Some(current) if !is_newer(event, current) => false,
        _ => {
            *slot = Some(event.clone());
            true
        }
    }
}
