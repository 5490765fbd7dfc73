// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Subscription handle

use std::fmt;

use nostr::{Event, RelayUrl, SubscriptionId};
use tokio::sync::mpsc;

/// Why a subscription ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionClosedReason {
    /// The relay sent `CLOSED`
    Closed(String),
    /// The connection attempt failed
    ConnectionFailed,
    /// The session was closed (by the peer, by an error or by [`disconnect`](super::RelayConnection::disconnect))
    Disconnected,
}

impl fmt::Display for SubscriptionClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(message) => write!(f, "closed by relay: {message}"),
            Self::ConnectionFailed => f.write_str("connection failed"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Activity of a single subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionActivity {
    /// Received a matching event
    Event(Box<Event>),
    /// The relay sent all the stored events (`EOSE`)
    EndOfStoredEvents,
    /// The subscription ended, no more activity will follow
    Closed(SubscriptionClosedReason),
}

/// A logical query registered on a [`RelayConnection`](super::RelayConnection)
///
/// Dropping the handle doesn't send `CLOSE` immediately: the relay connection notices the
/// dropped receiver at the next delivery and closes the subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    relay_url: RelayUrl,
    receiver: mpsc::UnboundedReceiver<SubscriptionActivity>,
}

impl Subscription {
    #[inline]
    pub(super) fn new(
        id: SubscriptionId,
        relay_url: RelayUrl,
        receiver: mpsc::UnboundedReceiver<SubscriptionActivity>,
    ) -> Self {
        Self {
            id,
            relay_url,
            receiver,
        }
    }

    /// Subscription ID
    #[inline]
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Relay URL
    #[inline]
    pub fn relay_url(&self) -> &RelayUrl {
        &self.relay_url
    }

    /// Wait for the next activity
    ///
    /// Returns `None` once the subscription has ended and all activity was consumed.
    #[inline]
    pub async fn recv(&mut self) -> Option<SubscriptionActivity> {
        self.receiver.recv().await
    }

    /// Get the next activity if available, without waiting
    #[inline]
    pub fn try_recv(&mut self) -> Option<SubscriptionActivity> {
        self.receiver.try_recv().ok()
    }
}
