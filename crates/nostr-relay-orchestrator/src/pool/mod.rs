// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Connection pool
//!
//! The durable set of relay connections of a session, organized in [`RelayGroup`]s.
//! Connections opened for a single discovery or crawl are *not* pool-owned.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_utility::time;
use futures::future;
use nostr::prelude::*;
use tokio::sync::RwLock;

mod error;
mod group;
mod options;
mod subscription;

pub use self::error::Error;
pub use self::group::RelayGroup;
pub use self::options::PoolOptions;
pub use self::subscription::{PoolActivity, PoolSubscription};
use crate::relay::{RelayConnection, RelayOptions, Subscription};
use crate::transport::{DefaultWebsocketTransport, IntoWebSocketTransport, WebSocketTransport};
use crate::url::normalize_relay_url;

#[derive(Debug)]
struct PoolEntry {
    relay: RelayConnection,
    groups: BTreeSet<RelayGroup>,
    /// Added with [`ConnectionPool::add_relay_with_auth`]
    auth_expected: bool,
}

#[derive(Debug)]
struct InnerConnectionPool {
    relays: RwLock<HashMap<RelayUrl, PoolEntry>>,
    signer: StdRwLock<Option<Arc<dyn NostrSigner>>>,
    transport: Arc<dyn WebSocketTransport>,
    opts: PoolOptions,
}

/// Connection pool
///
/// Cheap to clone: clones share the same relays.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<InnerConnectionPool>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// New pool with the default transport and options
    #[inline]
    pub fn new() -> Self {
        Self::with_transport(DefaultWebsocketTransport, PoolOptions::default())
    }

    /// New pool with a custom transport
    pub fn with_transport<T>(transport: T, opts: PoolOptions) -> Self
    where
        T: IntoWebSocketTransport,
    {
        Self {
            inner: Arc::new(InnerConnectionPool {
                relays: RwLock::new(HashMap::new()),
                signer: StdRwLock::new(None),
                transport: transport.into_transport(),
                opts,
            }),
        }
    }

    /// Transport shared by every pool relay
    ///
    /// Components opening ephemeral connections use it too.
    #[inline]
    pub fn transport(&self) -> Arc<dyn WebSocketTransport> {
        self.inner.transport.clone()
    }

    /// Options of the pool relays
    #[inline]
    pub fn relay_opts(&self) -> &RelayOptions {
        self.inner.opts.get_relay_opts()
    }

    /// Open a connection that is **not** owned by the pool, sharing the pool transport
    pub fn ephemeral_relay(&self, url: RelayUrl) -> RelayConnection {
        RelayConnection::with_opts(url, self.transport(), self.relay_opts().clone())
    }

    fn signer(&self) -> Option<Arc<dyn NostrSigner>> {
        self.inner
            .signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the signer for relays added from now on
    pub(crate) fn store_signer(&self, signer: Option<Arc<dyn NostrSigner>>) {
        let mut current = self
            .inner
            .signer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = signer;
    }

    /// Install (or remove) the signer used to answer relay `AUTH` challenges
    ///
    /// Applied to every held relay and to relays added later.
    pub async fn set_auth_signer(&self, signer: Option<Arc<dyn NostrSigner>>) {
        self.store_signer(signer.clone());

        let relays = self.inner.relays.read().await;
        for entry in relays.values() {
            entry.relay.set_auth_signer(signer.clone());
        }
    }

    /// Add a relay to a group
    ///
    /// If the relay is already in the pool, the group is added to its groups.
    /// Returns `true` if a new connection was created.
    #[inline]
    pub async fn add_relay<U>(&self, url: U, group: RelayGroup) -> Result<bool, Error>
    where
        U: AsRef<str>,
    {
        self.insert_relay(url.as_ref(), group, false).await
    }

    /// Add a relay the current user is expected to authenticate to (NIP-42)
    ///
    /// The relay gets the pool signer; if no signer is installed yet it gets it as soon as one is.
    #[inline]
    pub async fn add_relay_with_auth<U>(&self, url: U, group: RelayGroup) -> Result<bool, Error>
    where
        U: AsRef<str>,
    {
        self.insert_relay(url.as_ref(), group, true).await
    }

    async fn insert_relay(&self, url: &str, group: RelayGroup, auth: bool) -> Result<bool, Error> {
        let url: RelayUrl = normalize_relay_url(url)?;

        let mut relays = self.inner.relays.write().await;

        if let Some(entry) = relays.get_mut(&url) {
            entry.groups.insert(group);
            entry.auth_expected |= auth;
            return Ok(false);
        }

        if let Some(limit) = self.inner.opts.max_relays {
            if relays.len() >= limit {
                return Err(Error::TooManyRelays { limit });
            }
        }

        let relay: RelayConnection = RelayConnection::with_opts(
            url.clone(),
            self.transport(),
            self.inner.opts.relay.clone(),
        );

        let signer: Option<Arc<dyn NostrSigner>> = self.signer();

        if auth && signer.is_none() {
            tracing::debug!(url = %url, "Relay expects authentication but no signer is installed yet.");
        }

        relay.set_auth_signer(signer);

        tracing::debug!(url = %url, group = %group, "Relay added to pool.");

        relays.insert(
            url,
            PoolEntry {
                relay,
                groups: BTreeSet::from([group]),
                auth_expected: auth,
            },
        );

        Ok(true)
    }

    /// Get a pool relay
    pub async fn relay<U>(&self, url: U) -> Option<RelayConnection>
    where
        U: AsRef<str>,
    {
        let url: RelayUrl = normalize_relay_url(url.as_ref()).ok()?;
        let relays = self.inner.relays.read().await;
        relays.get(&url).map(|e| e.relay.clone())
    }

    /// Check if the relay is pool-owned
    #[inline]
    pub async fn contains<U>(&self, url: U) -> bool
    where
        U: AsRef<str>,
    {
        self.relay(url).await.is_some()
    }

    /// Check if the relay was added with [`ConnectionPool::add_relay_with_auth`]
    pub async fn expects_auth<U>(&self, url: U) -> bool
    where
        U: AsRef<str>,
    {
        let Ok(url) = normalize_relay_url(url.as_ref()) else {
            return false;
        };
        let relays = self.inner.relays.read().await;
        relays.get(&url).is_some_and(|e| e.auth_expected)
    }

    /// Disconnect and remove a relay
    pub async fn remove_relay<U>(&self, url: U) -> Result<(), Error>
    where
        U: AsRef<str>,
    {
        let url: RelayUrl = normalize_relay_url(url.as_ref())?;

        let mut relays = self.inner.relays.write().await;

        match relays.remove(&url) {
            Some(entry) => {
                entry.relay.disconnect();
                tracing::debug!(url = %url, "Relay removed from pool.");
                Ok(())
            }
            None => Err(Error::RelayNotFound(url)),
        }
    }

    /// All pool relays
    pub async fn relays(&self) -> HashMap<RelayUrl, RelayConnection> {
        let relays = self.inner.relays.read().await;
        relays
            .iter()
            .map(|(url, e)| (url.clone(), e.relay.clone()))
            .collect()
    }

    /// URLs of all pool relays
    pub async fn relay_urls(&self) -> Vec<RelayUrl> {
        let relays = self.inner.relays.read().await;
        relays.keys().cloned().collect()
    }

    /// Relays in a group
    pub async fn relays_in_group(&self, group: &RelayGroup) -> Vec<RelayConnection> {
        let relays = self.inner.relays.read().await;
        relays
            .values()
            .filter(|e| e.groups.contains(group))
            .map(|e| e.relay.clone())
            .collect()
    }

    /// Groups of a relay
    pub async fn groups<U>(&self, url: U) -> BTreeSet<RelayGroup>
    where
        U: AsRef<str>,
    {
        let Ok(url) = normalize_relay_url(url.as_ref()) else {
            return BTreeSet::new();
        };
        let relays = self.inner.relays.read().await;
        relays.get(&url).map(|e| e.groups.clone()).unwrap_or_default()
    }

    /// Connected pool relays
    pub async fn connected_relays(&self) -> Vec<RelayConnection> {
        let relays = self.inner.relays.read().await;
        relays
            .values()
            .filter(|e| e.relay.is_connected())
            .map(|e| e.relay.clone())
            .collect()
    }

    /// Connect the given pool relays and wait for every attempt to settle
    ///
    /// Unknown URLs are ignored. Returns the number of relays connected afterwards.
    pub async fn connect_relays<I, U>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let mut targets: Vec<RelayConnection> = Vec::new();
        for url in urls.into_iter() {
            if let Some(relay) = self.relay(url).await {
                if !targets.contains(&relay) {
                    targets.push(relay);
                }
            }
        }

        connect_all_settled(&targets).await
    }

    /// Connect every pool relay and wait for every attempt to settle
    pub async fn connect_all(&self) -> usize {
        let targets: Vec<RelayConnection> = self.relays().await.into_values().collect();
        connect_all_settled(&targets).await
    }

    /// Disconnect every pool relay (they stay in the pool)
    pub async fn disconnect_all(&self) {
        let relays = self.inner.relays.read().await;
        for entry in relays.values() {
            entry.relay.disconnect();
        }
    }

    /// Fan a query out to every connected pool relay
    ///
    /// If no relay is connected the subscription signals `EOSE` immediately.
    #[inline]
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<PoolSubscription, Error> {
        self.subscribe_with_id(SubscriptionId::generate(), filters)
            .await
    }

    /// Fan a query out to every connected pool relay, with a custom ID
    pub async fn subscribe_with_id(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<PoolSubscription, Error> {
        if filters.is_empty() {
            return Err(Error::Relay(crate::relay::Error::EmptyFilters));
        }

        let relays: Vec<RelayConnection> = self.connected_relays().await;

        let mut subs: Vec<Subscription> = Vec::with_capacity(relays.len());
        for relay in relays.iter() {
            match relay.subscribe_with_id(id.clone(), filters.clone()) {
                Ok(sub) => subs.push(sub),
                Err(e) => {
                    tracing::warn!(url = %relay.url(), error = %e, "Can't subscribe to relay.")
                }
            }
        }

        tracing::debug!(id = %id, relays = subs.len(), "Pool subscription opened.");

        Ok(PoolSubscription::new(id, subs, self.inner.opts.dedup_capacity))
    }

    /// Close a subscription on every pool relay
    pub async fn unsubscribe(&self, id: &SubscriptionId) {
        let relays = self.inner.relays.read().await;
        for entry in relays.values() {
            entry.relay.unsubscribe(id);
        }
    }

    /// Collect the stored events from every connected pool relay, newest first
    ///
    /// Returns what arrived within `timeout` if some relay doesn't send `EOSE`.
    pub async fn fetch_events(
        &self,
        filters: Vec<Filter>,
        timeout: Duration,
    ) -> Result<Vec<Event>, Error> {
        let mut sub: PoolSubscription = self.subscribe(filters).await?;

        let mut events: Vec<Event> = Vec::new();

        let collect = async {
            while let Some(activity) = sub.recv().await {
                match activity {
                    PoolActivity::Event { event, .. } => events.push(*event),
                    PoolActivity::EndOfStoredEvents => break,
                }
            }
        };

        if time::timeout(Some(timeout), collect).await.is_none() {
            tracing::debug!("Timeout while fetching events from pool.");
        }

        self.unsubscribe(sub.id()).await;

        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(events)
    }
}

/// Connect every relay in parallel, wait for every attempt to settle.
pub(crate) async fn connect_all_settled(relays: &[RelayConnection]) -> usize {
    future::join_all(relays.iter().map(|r| r.connect())).await;

    let connected: usize = relays.iter().filter(|r| r.is_connected()).count();

    for relay in relays.iter().filter(|r| !r.is_connected()) {
        tracing::warn!(url = %relay.url(), status = %relay.status(), "Relay not connected.");
    }

    connected
}
