// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Pool subscription

use std::collections::HashSet;

use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use nostr::{Event, RelayUrl, SubscriptionId};
use tokio::sync::mpsc;

use crate::dedup::DedupSet;
use crate::relay::{Subscription, SubscriptionActivity};

/// Merged activity of a pool subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolActivity {
    /// First sighting of an event, from any relay
    Event {
        /// Relay that delivered it first
        relay_url: RelayUrl,
        /// Event
        event: Box<Event>,
    },
    /// Every relay signaled `EOSE` or ended the subscription
    ///
    /// Sent exactly once.
    EndOfStoredEvents,
}

/// A query fanned out to many relays
///
/// Yields each event ID at most once. The channel ends once every relay subscription ended.
#[derive(Debug)]
pub struct PoolSubscription {
    id: SubscriptionId,
    relays: Vec<RelayUrl>,
    receiver: mpsc::UnboundedReceiver<PoolActivity>,
}

impl PoolSubscription {
    pub(super) fn new(id: SubscriptionId, subs: Vec<Subscription>, dedup_capacity: usize) -> Self {
        let relays: Vec<RelayUrl> = subs.iter().map(|s| s.relay_url().clone()).collect();

        let (tx, rx) = mpsc::unbounded_channel();

        async_utility::task::spawn(merge(subs, tx, dedup_capacity));

        Self {
            id,
            relays,
            receiver: rx,
        }
    }

    /// Subscription ID (the same on every relay)
    #[inline]
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Relays the query was sent to
    #[inline]
    pub fn relay_urls(&self) -> &[RelayUrl] {
        &self.relays
    }

    /// Wait for the next activity
    #[inline]
    pub async fn recv(&mut self) -> Option<PoolActivity> {
        self.receiver.recv().await
    }

    /// Get the next activity if available, without waiting
    #[inline]
    pub fn try_recv(&mut self) -> Option<PoolActivity> {
        self.receiver.try_recv().ok()
    }
}

async fn merge(
    subs: Vec<Subscription>,
    tx: mpsc::UnboundedSender<PoolActivity>,
    dedup_capacity: usize,
) {
    let total: usize = subs.len();

    let mut streams: SelectAll<BoxStream<'static, (RelayUrl, SubscriptionActivity)>> =
        SelectAll::new();
    for sub in subs.into_iter() {
        let url: RelayUrl = sub.relay_url().clone();
        streams.push(
            stream::unfold(sub, move |mut sub| {
                let url = url.clone();
                async move { sub.recv().await.map(|activity| ((url, activity), sub)) }
            })
            .boxed(),
        );
    }

    let mut dedup: DedupSet = DedupSet::new(dedup_capacity);
    let mut ended: HashSet<RelayUrl> = HashSet::with_capacity(total);
    let mut eose_sent: bool = false;

    // Nothing to wait for
    if total == 0 {
        let _ = tx.send(PoolActivity::EndOfStoredEvents);
        return;
    }

    loop {
        let (relay_url, activity) = tokio::select! {
            item = streams.next() => match item {
                Some(item) => item,
                None => break,
            },
            // Handle dropped: dropping the relay subscriptions closes them
            _ = tx.closed() => return,
        };

        match activity {
            SubscriptionActivity::Event(event) => {
                if dedup.insert(event.id) && tx.send(PoolActivity::Event { relay_url, event }).is_err() {
                    return;
                }
            }
            SubscriptionActivity::EndOfStoredEvents => {
                ended.insert(relay_url);
            }
            SubscriptionActivity::Closed(reason) => {
                tracing::debug!(url = %relay_url, reason = %reason, "Relay subscription ended.");
                ended.insert(relay_url);
            }
        }

        if !eose_sent && ended.len() >= total {
            eose_sent = true;
            if tx.send(PoolActivity::EndOfStoredEvents).is_err() {
                return;
            }
        }
    }

    if !eose_sent {
        let _ = tx.send(PoolActivity::EndOfStoredEvents);
    }
}
