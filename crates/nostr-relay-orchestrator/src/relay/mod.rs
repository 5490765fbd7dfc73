// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay connection
//!
//! A [`RelayConnection`] owns one WebSocket session to one relay and multiplexes any number of
//! [`Subscription`]s over it. It never reconnects on its own: callers decide the retry policy.

use std::cmp;
use std::sync::Arc;

use nostr::prelude::*;
use tokio::sync::broadcast;

mod constants;
mod error;
mod fetch;
mod inner;
mod notification;
mod options;
mod stats;
mod status;
mod subscription;

pub use self::constants::MAX_MESSAGE_SIZE;
pub use self::error::Error;
pub use self::fetch::FetchEvents;
use self::inner::InnerRelayConnection;
pub use self::notification::RelayNotification;
pub use self::options::RelayOptions;
pub use self::stats::RelayConnectionStats;
pub use self::status::ConnectionState;
pub use self::subscription::{Subscription, SubscriptionActivity, SubscriptionClosedReason};
use crate::transport::{DefaultWebsocketTransport, IntoWebSocketTransport};

/// Relay connection
///
/// Cheap to clone: all clones share the same session. The session is closed when the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    inner: InnerRelayConnection,
    // Keep track of the atomic reference count to know when to close the session.
    atomic_counter: Arc<()>,
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if Arc::strong_count(&self.atomic_counter) == 1 {
            self.inner.disconnect();
        }
    }
}

impl PartialEq for RelayConnection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.url == other.inner.url
    }
}

impl Eq for RelayConnection {}

impl PartialOrd for RelayConnection {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelayConnection {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.inner.url.cmp(&other.inner.url)
    }
}

impl RelayConnection {
    /// New relay connection with the default transport and options
    #[inline]
    pub fn new(url: RelayUrl) -> Self {
        Self::with_opts(url, DefaultWebsocketTransport, RelayOptions::default())
    }

    /// New relay connection with a custom transport
    pub fn with_opts<T>(url: RelayUrl, transport: T, opts: RelayOptions) -> Self
    where
        T: IntoWebSocketTransport,
    {
        Self {
            inner: InnerRelayConnection::new(url, transport.into_transport(), opts),
            atomic_counter: Arc::new(()),
        }
    }

    /// Get relay url
    #[inline]
    pub fn url(&self) -> &RelayUrl {
        &self.inner.url
    }

    /// Get connection state
    #[inline]
    pub fn status(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Check if the session is open
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Get options
    #[inline]
    pub fn opts(&self) -> &RelayOptions {
        &self.inner.opts
    }

    /// Get connection stats
    #[inline]
    pub fn stats(&self) -> &RelayConnectionStats {
        &self.inner.stats
    }

    /// Get notifications receiver
    #[inline]
    pub fn notifications(&self) -> broadcast::Receiver<RelayNotification> {
        self.inner.notifications()
    }

    /// Try to open the session
    ///
    /// Resolves once the attempt concluded, successfully or not: check [`RelayConnection::status`]
    /// afterward. Subscriptions registered before the session opened are sent as soon as it opens.
    /// If the attempt fails, they are closed with [`SubscriptionClosedReason::ConnectionFailed`].
    ///
    /// Does nothing if already connected.
    #[inline]
    pub async fn connect(&self) {
        self.inner.connect().await
    }

    /// Close the session
    ///
    /// Every open subscription ends with [`SubscriptionClosedReason::Disconnected`].
    /// Calling it again has no effect.
    #[inline]
    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    /// Install (or remove) the signer used to answer NIP-42 `AUTH` challenges
    ///
    /// Without a signer, challenges are ignored and the session stays open.
    #[inline]
    pub fn set_auth_signer(&self, signer: Option<Arc<dyn NostrSigner>>) {
        self.inner.set_signer(signer)
    }

    /// Register a subscription with an auto-generated ID
    ///
    /// Never waits: if the session isn't open yet, the `REQ` is sent when it opens.
    #[inline]
    pub fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, Error> {
        self.subscribe_with_id(SubscriptionId::generate(), filters)
    }

    /// Register a subscription with a custom ID
    ///
    /// An existing subscription with the same ID is replaced.
    #[inline]
    pub fn subscribe_with_id(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<Subscription, Error> {
        self.inner.subscribe(id, filters)
    }

    /// Close a subscription
    ///
    /// Returns `false` if the subscription wasn't found.
    #[inline]
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// IDs of the open subscriptions
    #[inline]
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.inner.subscription_ids()
    }

    /// Fetch the stored events matching `filters`
    ///
    /// Requires an open session.
    #[inline]
    pub fn fetch_events(&self, filters: Vec<Filter>) -> FetchEvents<'_> {
        FetchEvents::new(self, filters)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_utility::time;
    use nostr_relay_builder::prelude::*;

    use super::{
        ConnectionState, Error, RelayConnection, RelayNotification, RelayOptions, Subscription,
        SubscriptionActivity, SubscriptionClosedReason, *,
    };
    use crate::testing::{text_note, ScriptedRelay, ScriptedTransport};

    fn new_relay(transport: &ScriptedTransport, url: &str) -> RelayConnection {
        let url = RelayUrl::parse(url).unwrap();
        RelayConnection::with_opts(url, transport.clone(), RelayOptions::default())
    }

    async fn next_activity(sub: &mut Subscription) -> SubscriptionActivity {
        time::timeout(Some(Duration::from_secs(2)), sub.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_with_mock_relay() {
        let mock = MockRelay::run().await.unwrap();
        let url = mock.url().await;

        let relay = RelayConnection::new(url);
        assert_eq!(relay.status(), ConnectionState::Disconnected);

        relay.connect().await;
        assert_eq!(relay.status(), ConnectionState::Connected);
        assert!(relay.stats().latency().is_some());

        let mut sub = relay
            .subscribe(vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::EndOfStoredEvents
        );

        relay.disconnect();
        relay.disconnect();

        assert_eq!(relay.status(), ConnectionState::Disconnected);
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::Closed(SubscriptionClosedReason::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error() {
        let url = RelayUrl::parse("ws://127.0.0.1:666").unwrap();
        let opts = RelayOptions::default().connection_timeout(Duration::from_secs(2));
        let relay = RelayConnection::with_opts(url, DefaultWebsocketTransport, opts);

        let mut sub = relay.subscribe(vec![Filter::new().limit(1)]).unwrap();

        relay.connect().await;

        assert_eq!(relay.status(), ConnectionState::Error);
        assert_eq!(relay.stats().attempts(), 1);
        assert_eq!(relay.stats().success(), 0);
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::Closed(SubscriptionClosedReason::ConnectionFailed)
        );
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_sent_on_connect() {
        let keys = Keys::generate();
        let note = text_note(&keys, "hello", 100);

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one").events([note.clone()]));

        let relay = new_relay(&transport, "wss://relay.one");

        let mut sub = relay
            .subscribe(vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();
        assert!(sub.try_recv().is_none());

        relay.connect().await;
        assert!(relay.is_connected());

        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::Event(Box::new(note))
        );
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::EndOfStoredEvents
        );

        // Closing the session ends the subscription
        relay.disconnect();
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::Closed(SubscriptionClosedReason::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_concurrent_connect_attempts_once() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one"));

        let relay = new_relay(&transport, "wss://relay.one");

        tokio::join!(relay.connect(), relay.connect(), relay.connect());

        assert!(relay.is_connected());
        assert_eq!(relay.stats().attempts(), 1);
        assert_eq!(transport.sessions_opened("wss://relay.one"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one"));

        let relay = new_relay(&transport, "wss://relay.one");
        relay.connect().await;

        let sub = relay.subscribe(vec![Filter::new().limit(10)]).unwrap();
        assert_eq!(relay.subscriptions(), vec![sub.id().clone()]);

        assert!(relay.unsubscribe(sub.id()));
        assert!(!relay.unsubscribe(sub.id()));
        assert!(relay.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_filters() {
        let transport = ScriptedTransport::new();
        let relay = new_relay(&transport, "wss://relay.one");
        assert!(matches!(relay.subscribe(Vec::new()), Err(Error::EmptyFilters)));
    }

    #[tokio::test]
    async fn test_peer_close_moves_to_error() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one"));

        let relay = new_relay(&transport, "wss://relay.one");
        relay.connect().await;

        let mut sub = relay.subscribe(vec![Filter::new().limit(1)]).unwrap();
        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::EndOfStoredEvents
        );

        transport.drop_sessions("wss://relay.one");

        assert_eq!(
            next_activity(&mut sub).await,
            SubscriptionActivity::Closed(SubscriptionClosedReason::Disconnected)
        );
        assert_eq!(relay.status(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_fetch_events() {
        let keys = Keys::generate();
        let old = text_note(&keys, "old", 100);
        let new = text_note(&keys, "new", 200);

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one").events([old, new]));

        let relay = new_relay(&transport, "wss://relay.one");

        // Not connected
        assert!(matches!(
            relay.fetch_events(vec![Filter::new()]).await,
            Err(Error::NotConnected)
        ));

        relay.connect().await;

        let events = relay
            .fetch_events(vec![Filter::new().author(keys.public_key())])
            .timeout(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(relay.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_drop_last_handle_disconnects() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.one"));

        let relay = new_relay(&transport, "wss://relay.one");
        relay.connect().await;
        assert_eq!(transport.open_sessions("wss://relay.one"), 1);

        let clone = relay.clone();
        drop(relay);
        assert!(clone.is_connected());

        drop(clone);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.open_sessions("wss://relay.one"), 0);
    }

    #[tokio::test]
    async fn test_auth_challenge_with_signer() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://relay.auth").require_auth());

        let relay = new_relay(&transport, "wss://relay.auth");

        let keys = Keys::generate();
        relay.set_auth_signer(Some(Arc::new(keys) as Arc<dyn NostrSigner>));

        let mut notifications = relay.notifications();

        relay.connect().await;

        let authenticated = time::timeout(Some(Duration::from_secs(2)), async {
            while let Ok(notification) = notifications.recv().await {
                if let RelayNotification::Authenticated = notification {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        assert!(authenticated);
    }
}
