// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::collections::HashSet;
use std::future::IntoFuture;
use std::time::Duration;

use async_utility::time;
use nostr::{Event, EventId, Filter, SubscriptionId};

use super::{Error, RelayConnection, Subscription, SubscriptionActivity};
use crate::future::BoxedFuture;

/// One-shot query: collect the stored events, stop at `EOSE`
///
/// If the timeout elapses the events received so far are returned.
#[must_use = "Does nothing unless you await!"]
pub struct FetchEvents<'relay> {
    relay: &'relay RelayConnection,
    filters: Vec<Filter>,
    timeout: Option<Duration>,
}

impl<'relay> FetchEvents<'relay> {
    pub(super) fn new(relay: &'relay RelayConnection, filters: Vec<Filter>) -> Self {
        Self {
            relay,
            filters,
            timeout: None,
        }
    }

    /// Set a timeout
    ///
    /// By default, no timeout is configured.
    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'relay> IntoFuture for FetchEvents<'relay> {
    type Output = Result<Vec<Event>, Error>;
    type IntoFuture = BoxedFuture<'relay, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            if !self.relay.status().is_connected() {
                return Err(Error::NotConnected);
            }

            let id: SubscriptionId = SubscriptionId::generate();
            let mut sub: Subscription = self.relay.subscribe_with_id(id.clone(), self.filters)?;

            let mut events: Vec<Event> = Vec::new();
            let mut seen: HashSet<EventId> = HashSet::new();

            let collect = async {
                while let Some(activity) = sub.recv().await {
                    match activity {
                        SubscriptionActivity::Event(event) => {
                            if seen.insert(event.id) {
                                events.push(*event);
                            }
                        }
                        SubscriptionActivity::EndOfStoredEvents => break,
                        SubscriptionActivity::Closed(reason) => {
                            tracing::debug!(url = %self.relay.url(), reason = %reason, "Fetch subscription closed.");
                            break;
                        }
                    }
                }
            };

            if time::timeout(self.timeout, collect).await.is_none() {
                tracing::debug!(url = %self.relay.url(), "Timeout while fetching events.");
            }

            self.relay.unsubscribe(&id);

            Ok(events)
        })
    }
}
