// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Bootstrap orchestrator
//!
//! Drives the startup of a user session:
//!
//! 1. discover the indexers;
//! 2. apply cached profile, relay list and contacts;
//! 3. ask every indexer for the newest profile, relay list and contacts (newest wins);
//! 4. connect the declared outbox and inbox relays in the pool;
//! 5. tear down the indexer sessions and schedule a periodic light refresh.
//!
//! Every step is bounded: a slow indexer delays the query phase by at most
//! [`BootstrapOptions::query_timeout`], a failed relay simply contributes nothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_utility::{task, time};
use futures::future::{self, AbortHandle, Abortable, BoxFuture, Shared};
use futures::FutureExt;
use nostr::prelude::*;
use tokio::sync::watch;

mod options;
mod state;

pub use self::options::BootstrapOptions;
pub use self::state::{following_count, BootstrapPhase, BootstrapState, RelayListPartition};
use self::state::Slot;
use crate::cache::EventCache;
use crate::discovery::IndexerDiscovery;
use crate::pool::{self, ConnectionPool, RelayGroup};
use crate::relay::{RelayConnection, Subscription, SubscriptionActivity};

type PendingBootstrap = Shared<BoxFuture<'static, Arc<BootstrapState>>>;

struct BootstrapRun {
    run: u64,
    public_key: PublicKey,
    pending: PendingBootstrap,
}

/// Closes the indexer subscriptions when the query ends or times out
struct CloseOnDrop<'a> {
    relay: &'a RelayConnection,
    ids: Vec<SubscriptionId>,
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        for id in self.ids.iter() {
            self.relay.unsubscribe(id);
        }
    }
}

struct InnerBootstrapOrchestrator {
    pool: ConnectionPool,
    discovery: IndexerDiscovery,
    cache: Option<Arc<dyn EventCache>>,
    opts: BootstrapOptions,
    state: watch::Sender<BootstrapState>,
    current: Mutex<Option<BootstrapRun>>,
    refresher: Mutex<Option<AbortHandle>>,
    runs: AtomicU64,
}

impl fmt::Debug for InnerBootstrapOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerBootstrapOrchestrator")
            .field("pool", &self.pool)
            .field("discovery", &self.discovery)
            .field("cache", &self.cache)
            .field("opts", &self.opts)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for InnerBootstrapOrchestrator {
    fn drop(&mut self) {
        self.stop_refresher();
    }
}

/// Bootstrap orchestrator
///
/// Cheap to clone: clones share the same state.
#[derive(Debug, Clone)]
pub struct BootstrapOrchestrator {
    inner: Arc<InnerBootstrapOrchestrator>,
}

impl BootstrapOrchestrator {
    /// New orchestrator
    ///
    /// Outbox and inbox relays are added to `pool`. The cache is optional.
    pub fn new(
        pool: ConnectionPool,
        discovery: IndexerDiscovery,
        cache: Option<Arc<dyn EventCache>>,
        opts: BootstrapOptions,
    ) -> Self {
        let (state, ..) = watch::channel(BootstrapState::default());
        Self {
            inner: Arc::new(InnerBootstrapOrchestrator {
                pool,
                discovery,
                cache,
                opts,
                state,
                current: Mutex::new(None),
                refresher: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the current state
    #[inline]
    pub fn state(&self) -> BootstrapState {
        self.inner.state.borrow().clone()
    }

    /// Watch the state
    #[inline]
    pub fn subscribe_state(&self) -> watch::Receiver<BootstrapState> {
        self.inner.state.subscribe()
    }

    /// Bootstrap a user
    ///
    /// Concurrent and repeated calls for the same public key share the same run and resolve
    /// to the same state. Bootstrapping another public key resets the current one.
    /// A run that ended in [`BootstrapPhase::Error`] is not reused: the next call starts over.
    pub async fn bootstrap(&self, public_key: PublicKey) -> Arc<BootstrapState> {
        let pending: PendingBootstrap = {
            let mut current = self
                .inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match current.as_ref().filter(|run| run.public_key == public_key) {
                Some(run) => run.pending.clone(),
                None => {
                    if let Some(previous) = current.take() {
                        tracing::info!(public_key = %previous.public_key, "Switching account.");
                        self.inner.stop_refresher();
                    }

                    let run: u64 = self.inner.new_run(Some(public_key));

                    let inner: Arc<InnerBootstrapOrchestrator> = self.inner.clone();
                    let pending: PendingBootstrap = async move { inner.run(run, public_key).await }
                        .boxed()
                        .shared();

                    *current = Some(BootstrapRun {
                        run,
                        public_key,
                        pending: pending.clone(),
                    });

                    pending
                }
            }
        };

        pending.await
    }

    /// Refresh profile, relay list and contacts now
    ///
    /// Asks a few indexers, without changing phase or reconnecting relays.
    /// Returns `false` if no bootstrap is ready.
    pub async fn refresh_now(&self) -> bool {
        let (run, public_key) = {
            let state = self.inner.state.borrow();
            match (state.phase, state.public_key) {
                (BootstrapPhase::Ready, Some(public_key)) => (state.run, public_key),
                _ => return false,
            }
        };

        self.inner.refresh(run, public_key).await
    }

    /// Stop the refresher and go back to [`BootstrapPhase::Idle`] (logout or account switch)
    ///
    /// Pool relays stay connected.
    pub fn reset(&self) {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = None;

        self.inner.stop_refresher();
        self.inner.new_run(None);

        tracing::debug!("Bootstrap reset.");
    }
}

impl InnerBootstrapOrchestrator {
    /// Start a new run, making any previous one stale
    fn new_run(&self, public_key: Option<PublicKey>) -> u64 {
        let run: u64 = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(BootstrapState::new(run, public_key));
        run
    }

    /// Apply `f` if `run` is still the current run
    fn update<F>(&self, run: u64, f: F) -> bool
    where
        F: FnOnce(&mut BootstrapState) -> bool,
    {
        self.state.send_if_modified(|state| state.run == run && f(state))
    }

    fn set_phase(&self, run: u64, phase: BootstrapPhase) {
        if self.update(run, |s| {
            s.phase = phase;
            true
        }) {
            tracing::debug!(phase = %phase, "Bootstrap phase changed.");
        }
    }

    /// Drop the cached run, if still `run`, so that the next bootstrap starts over
    fn forget_run(&self, run: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|r| r.run == run) {
            *current = None;
        }
    }

    fn snapshot(&self) -> Arc<BootstrapState> {
        Arc::new(self.state.borrow().clone())
    }

    async fn run(self: Arc<Self>, run: u64, public_key: PublicKey) -> Arc<BootstrapState> {
        tracing::info!(public_key = %public_key, "Bootstrapping.");

        self.set_phase(run, BootstrapPhase::DiscoveringIndexers);

        let indexers: Vec<RelayUrl> = self
            .discovery
            .discover_indexers(self.opts.indexer_count)
            .await;

        if indexers.is_empty() {
            tracing::error!(public_key = %public_key, "No indexer available, bootstrap failed.");
            self.update(run, |s| {
                s.phase = BootstrapPhase::Error;
                s.error = Some(String::from("no indexer available"));
                true
            });
            self.forget_run(run);
            return self.snapshot();
        }

        self.load_cached(run, &public_key).await;

        self.set_phase(run, BootstrapPhase::QueryingIndexers);
        let ephemerals: Vec<RelayConnection> =
            self.query_indexers(run, &public_key, &indexers, true).await;

        self.set_phase(run, BootstrapPhase::ConnectingRelays);
        self.connect_relays(run).await;

        self.set_phase(run, BootstrapPhase::Ready);

        teardown(ephemerals);

        if self.opts.refresh && self.state.borrow().run == run {
            self.start_refresher(run, public_key);
        }

        let state: Arc<BootstrapState> = self.snapshot();

        tracing::info!(
            public_key = %public_key,
            outbox = state.outbox_connected,
            inbox = state.inbox_connected,
            following = state.following_count,
            "Bootstrap ready."
        );

        state
    }

    async fn load_cached(&self, run: u64, public_key: &PublicKey) {
        let Some(cache) = &self.cache else {
            return;
        };

        let (profile, relay_list, contacts) = tokio::join!(
            cache.profile(*public_key),
            cache.relay_list(*public_key),
            cache.contacts(*public_key)
        );

        for res in [profile, relay_list, contacts] {
            match res {
                Ok(Some(event)) => {
                    self.update(run, |s| s.adopt(public_key, &event));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "Can't read cache."),
            }
        }
    }

    /// Query the indexers, returning the connections that are not pool-owned
    async fn query_indexers(
        &self,
        run: u64,
        public_key: &PublicKey,
        indexers: &[RelayUrl],
        counted: bool,
    ) -> Vec<RelayConnection> {
        let mut relays: Vec<(RelayConnection, bool)> = Vec::with_capacity(indexers.len());
        for url in indexers.iter() {
            match self.pool.relay(url.as_str()).await {
                Some(relay) => relays.push((relay, true)),
                None => relays.push((self.pool.ephemeral_relay(url.clone()), false)),
            }
        }

        if counted {
            self.update(run, |s| {
                s.indexers_queried = relays.len();
                s.indexers_responded = 0;
                true
            });
        }

        let queries = relays
            .iter()
            .map(|(relay, ..)| self.query_indexer(run, public_key, relay, counted));

        if time::timeout(Some(self.opts.query_timeout), future::join_all(queries))
            .await
            .is_none()
        {
            tracing::warn!("Some indexers didn't answer in time.");
        }

        relays
            .into_iter()
            .filter_map(|(relay, pool_owned)| (!pool_owned).then_some(relay))
            .collect()
    }

    async fn query_indexer(
        &self,
        run: u64,
        public_key: &PublicKey,
        relay: &RelayConnection,
        counted: bool,
    ) {
        relay.connect().await;

        if relay.is_connected() {
            let mut subs: Vec<Subscription> = Vec::with_capacity(Slot::ALL.len());
            for slot in Slot::ALL.into_iter() {
                let filter: Filter = Filter::new().author(*public_key).kind(slot.kind()).limit(1);
                match relay.subscribe(vec![filter]) {
                    Ok(sub) => subs.push(sub),
                    Err(e) => tracing::debug!(url = %relay.url(), error = %e, "Can't query indexer."),
                }
            }

            let _close = CloseOnDrop {
                relay,
                ids: subs.iter().map(|s| s.id().clone()).collect(),
            };

            future::join_all(
                subs.into_iter()
                    .map(|sub| self.consume(run, public_key, sub)),
            )
            .await;
        } else {
            tracing::debug!(url = %relay.url(), status = %relay.status(), "Indexer unreachable.");
        }

        if counted {
            self.update(run, |s| {
                s.indexers_responded += 1;
                true
            });
        }
    }

    async fn consume(&self, run: u64, public_key: &PublicKey, mut sub: Subscription) {
        while let Some(activity) = sub.recv().await {
            match activity {
                SubscriptionActivity::Event(event) => {
                    self.handle_event(run, public_key, &event).await
                }
                SubscriptionActivity::EndOfStoredEvents => break,
                SubscriptionActivity::Closed(reason) => {
                    tracing::debug!(url = %sub.relay_url(), reason = %reason, "Indexer closed the query.");
                    break;
                }
            }
        }
    }

    async fn handle_event(&self, run: u64, public_key: &PublicKey, event: &Event) {
        if &event.pubkey != public_key || Slot::from_kind(event.kind).is_none() {
            tracing::debug!(id = %event.id, "Ignoring unexpected event from indexer.");
            return;
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.cache_event(event).await {
                tracing::debug!(id = %event.id, error = %e, "Can't cache event.");
            }
        }

        if self.update(run, |s| s.adopt(public_key, event)) {
            tracing::trace!(id = %event.id, kind = %event.kind, "Event adopted.");
        }
    }

    async fn connect_relays(&self, run: u64) {
        let partition: RelayListPartition = self.state.borrow().relays();

        if partition.outbox.is_empty() && partition.inbox.is_empty() {
            tracing::debug!("No relay list, skipping relay connection.");
            return;
        }

        let groups = [
            (&partition.outbox, RelayGroup::Outbox),
            (&partition.inbox, RelayGroup::Inbox),
        ];

        for (urls, group) in groups.into_iter() {
            for url in urls.iter() {
                if let Err(e) = self
                    .pool
                    .add_relay_with_auth(url.as_str(), group.clone())
                    .await
                {
                    tracing::warn!(url = %url, group = %group, error = %e, "Can't add relay to pool.");
                }
            }
        }

        let mut relays: Vec<RelayConnection> = Vec::new();
        for url in partition.union().iter() {
            if let Some(relay) = self.pool.relay(url.as_str()).await {
                relays.push(relay);
            }
        }

        pool::connect_all_settled(&relays).await;

        let connected = |urls: &[RelayUrl]| {
            relays
                .iter()
                .filter(|r| r.is_connected() && urls.contains(r.url()))
                .count()
        };
        let outbox_connected: usize = connected(&partition.outbox);
        let inbox_connected: usize = connected(&partition.inbox);

        self.update(run, |s| {
            s.outbox_connected = outbox_connected;
            s.inbox_connected = inbox_connected;
            true
        });
    }

    async fn refresh(&self, run: u64, public_key: PublicKey) -> bool {
        let indexers: Vec<RelayUrl> = self
            .discovery
            .indexers()
            .into_iter()
            .take(self.opts.refresh_indexers)
            .collect();

        if indexers.is_empty() {
            return false;
        }

        tracing::debug!(public_key = %public_key, indexers = indexers.len(), "Refreshing bootstrap data.");

        let ephemerals: Vec<RelayConnection> =
            self.query_indexers(run, &public_key, &indexers, false).await;
        teardown(ephemerals);

        true
    }

    fn start_refresher(self: &Arc<Self>, run: u64, public_key: PublicKey) {
        let (handle, registration) = AbortHandle::new_pair();

        let inner: Weak<Self> = Arc::downgrade(self);
        let interval = self.opts.refresh_interval;

        task::spawn(Abortable::new(
            async move {
                loop {
                    time::sleep(interval).await;

                    let Some(inner) = inner.upgrade() else {
                        break;
                    };

                    inner.refresh(run, public_key).await;
                }
            },
            registration,
        ));

        let mut refresher = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = refresher.replace(handle) {
            previous.abort();
        }
    }

    fn stop_refresher(&self) {
        let mut refresher = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = refresher.take() {
            handle.abort();
        }
    }
}

fn teardown(relays: Vec<RelayConnection>) {
    for relay in relays.into_iter() {
        relay.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryEventCache;
    use crate::discovery::DiscoveryOptions;
    use crate::pool::PoolOptions;
    use crate::testing::{event_with_tags, init_tracing, tag, ScriptedRelay, ScriptedTransport};

    struct Fixture {
        transport: ScriptedTransport,
        pool: ConnectionPool,
        orchestrator: BootstrapOrchestrator,
    }

    fn fixture(
        transport: ScriptedTransport,
        indexers: &[&str],
        cache: Option<Arc<dyn EventCache>>,
        opts: BootstrapOptions,
    ) -> Fixture {
        let pool = ConnectionPool::with_transport(transport.clone(), PoolOptions::default());
        let discovery = IndexerDiscovery::new(
            transport.clone(),
            None,
            DiscoveryOptions::default()
                .nip66(false)
                .fallback_relays(indexers.iter().copied()),
        );
        let orchestrator = BootstrapOrchestrator::new(pool.clone(), discovery, cache, opts);
        Fixture {
            transport,
            pool,
            orchestrator,
        }
    }

    fn user_events(keys: &Keys) -> Vec<Event> {
        let contacts: Vec<Vec<String>> = (0..3)
            .map(|_| tag(&["p", &Keys::generate().public_key().to_hex()]))
            .collect();

        vec![
            event_with_tags(keys, Kind::Metadata, r#"{"name":"abc"}"#, 500, []),
            event_with_tags(
                keys,
                Kind::RelayList,
                "",
                400,
                [
                    tag(&["r", "wss://outbox.relay", "write"]),
                    tag(&["r", "wss://inbox.relay", "read"]),
                ],
            ),
            event_with_tags(keys, Kind::ContactList, "", 300, contacts),
        ]
    }

    #[tokio::test]
    async fn test_bootstrap_end_to_end() {
        init_tracing();

        let keys = Keys::generate();

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://indexer.one").refuse());
        transport.add(ScriptedRelay::new("wss://indexer.two").events(user_events(&keys)));
        transport.add(ScriptedRelay::new("wss://outbox.relay"));
        transport.add(ScriptedRelay::new("wss://inbox.relay"));

        let f = fixture(
            transport,
            &["wss://indexer.one", "wss://indexer.two"],
            None,
            BootstrapOptions::default().refresh(false),
        );

        let state = f.orchestrator.bootstrap(keys.public_key()).await;

        assert_eq!(state.phase, BootstrapPhase::Ready);
        assert_eq!(state.profile.as_ref().unwrap().created_at, Timestamp::from(500));
        assert_eq!(state.indexers_queried, 2);
        assert_eq!(state.indexers_responded, 2);
        assert_eq!(state.outbox_connected, 1);
        assert_eq!(state.inbox_connected, 1);
        assert_eq!(state.following_count, 3);
        assert!(state.error.is_none());

        // Outbox and inbox are pool relays, the indexers are not
        assert_eq!(f.pool.relays_in_group(&RelayGroup::Outbox).await.len(), 1);
        assert_eq!(f.pool.relays_in_group(&RelayGroup::Inbox).await.len(), 1);
        assert!(!f.pool.contains("wss://indexer.two").await);
        assert!(f.pool.expects_auth("wss://outbox.relay").await);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.transport.sessions_opened("wss://indexer.two"), 1);
        assert_eq!(f.transport.open_sessions("wss://indexer.two"), 0);
        assert_eq!(f.transport.open_sessions("wss://indexer.one"), 0);
        assert_eq!(f.transport.open_sessions("wss://outbox.relay"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_shares_state() {
        let keys = Keys::generate();

        let transport = ScriptedTransport::new();
        transport.add(
            ScriptedRelay::new("wss://indexer.one")
                .connect_delay(Duration::from_millis(50))
                .events(user_events(&keys)),
        );

        let f = fixture(
            transport,
            &["wss://indexer.one"],
            None,
            BootstrapOptions::default().refresh(false),
        );

        let (a, b) = tokio::join!(
            f.orchestrator.bootstrap(keys.public_key()),
            f.orchestrator.bootstrap(keys.public_key())
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_ready());

        // Ready: no new work
        let c = f.orchestrator.bootstrap(keys.public_key()).await;
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(f.transport.sessions_opened("wss://indexer.one"), 1);
    }

    #[tokio::test]
    async fn test_newest_wins_across_indexers() {
        let keys = Keys::generate();
        let old = event_with_tags(&keys, Kind::Metadata, r#"{"name":"old"}"#, 100, []);
        let new = event_with_tags(&keys, Kind::Metadata, r#"{"name":"new"}"#, 200, []);

        // Both arrival orders
        for (first, second) in [(old.clone(), new.clone()), (new.clone(), old.clone())] {
            let transport = ScriptedTransport::new();
            transport.add(ScriptedRelay::new("wss://indexer.one").events([first]));
            transport.add(
                ScriptedRelay::new("wss://indexer.two")
                    .connect_delay(Duration::from_millis(50))
                    .events([second]),
            );

            let f = fixture(
                transport,
                &["wss://indexer.one", "wss://indexer.two"],
                None,
                BootstrapOptions::default().refresh(false),
            );

            let state = f.orchestrator.bootstrap(keys.public_key()).await;
            assert_eq!(state.profile.as_ref().unwrap().created_at, Timestamp::from(200));
            assert_eq!(state.metadata().unwrap().name.as_deref(), Some("new"));
        }
    }

    #[tokio::test]
    async fn test_foreign_events_are_ignored() {
        let keys = Keys::generate();
        let intruder = Keys::generate();

        // A dishonest indexer answering with someone else's profile
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://indexer.one").events([event_with_tags(
            &intruder,
            Kind::Metadata,
            "{}",
            900,
            [],
        )]));

        let f = fixture(
            transport,
            &["wss://indexer.one"],
            None,
            BootstrapOptions::default().refresh(false),
        );

        let state = f.orchestrator.bootstrap(keys.public_key()).await;
        assert!(state.is_ready());
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_hung_indexer_is_bounded() {
        let keys = Keys::generate();

        let transport = ScriptedTransport::new();
        transport.add(
            ScriptedRelay::new("wss://indexer.one")
                .never_eose()
                .events(user_events(&keys)),
        );

        let f = fixture(
            transport,
            &["wss://indexer.one"],
            None,
            BootstrapOptions::default()
                .refresh(false)
                .query_timeout(Duration::from_millis(200)),
        );

        let state = time::timeout(
            Some(Duration::from_secs(2)),
            f.orchestrator.bootstrap(keys.public_key()),
        )
        .await
        .unwrap();

        assert!(state.is_ready());
        assert_eq!(state.indexers_responded, 0);
        assert_eq!(state.following_count, 3);
    }

    #[tokio::test]
    async fn test_cache_fast_path_and_write_through() {
        let keys = Keys::generate();
        let cached = event_with_tags(&keys, Kind::Metadata, r#"{"name":"cached"}"#, 50, []);

        let cache = Arc::new(MemoryEventCache::new());
        cache.cache_event(&cached).await.unwrap();

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://indexer.one").events(user_events(&keys)));

        let f = fixture(
            transport,
            &["wss://indexer.one"],
            Some(cache.clone() as Arc<dyn EventCache>),
            BootstrapOptions::default().refresh(false),
        );

        let mut states = f.orchestrator.subscribe_state();
        let state = f.orchestrator.bootstrap(keys.public_key()).await;
        assert_eq!(state.profile.as_ref().unwrap().created_at, Timestamp::from(500));
        assert!(states.has_changed().unwrap());

        let profile = cache.profile(keys.public_key()).await.unwrap().unwrap();
        assert_eq!(profile.created_at, Timestamp::from(500));
        assert!(cache.contacts(keys.public_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_indexers_is_an_error() {
        let keys = Keys::generate();
        let f = fixture(
            ScriptedTransport::new(),
            &[],
            None,
            BootstrapOptions::default().refresh(false),
        );

        let state = f.orchestrator.bootstrap(keys.public_key()).await;
        assert_eq!(state.phase, BootstrapPhase::Error);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_bootstrap_is_retried() {
        let keys = Keys::generate();
        let f = fixture(
            ScriptedTransport::new(),
            &[],
            None,
            BootstrapOptions::default().refresh(false),
        );

        let first = f.orchestrator.bootstrap(keys.public_key()).await;
        assert_eq!(first.phase, BootstrapPhase::Error);
        assert!(f.orchestrator.inner.current.lock().unwrap().is_none());

        let second = f.orchestrator.bootstrap(keys.public_key()).await;
        assert_eq!(second.phase, BootstrapPhase::Error);
        assert_eq!(f.orchestrator.inner.runs.load(Ordering::SeqCst), 2);
        assert!(second.run > first.run);
    }

    #[tokio::test]
    async fn test_reset_and_refresh() {
        let keys = Keys::generate();

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://indexer.one").events(user_events(&keys)));

        let f = fixture(
            transport,
            &["wss://indexer.one"],
            None,
            BootstrapOptions::default().refresh_interval(Duration::from_secs(3600)),
        );

        f.orchestrator.bootstrap(keys.public_key()).await;
        assert!(f.orchestrator.refresh_now().await);
        assert_eq!(f.transport.sessions_opened("wss://indexer.one"), 2);

        f.orchestrator.reset();
        let state = f.orchestrator.state();
        assert_eq!(state.phase, BootstrapPhase::Idle);
        assert!(state.public_key.is_none());
        assert!(!f.orchestrator.refresh_now().await);

        // A new run after reset
        let state = f.orchestrator.bootstrap(keys.public_key()).await;
        assert!(state.is_ready());
        assert_eq!(f.transport.sessions_opened("wss://indexer.one"), 3);
    }
}
