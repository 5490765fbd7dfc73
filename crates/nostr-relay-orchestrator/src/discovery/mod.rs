// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Indexer discovery
//!
//! Picks the relays used to bootstrap a session, with graceful degradation:
//!
//! 1. ask the ranking service (bounded by a timeout);
//! 2. otherwise adopt the static fallback list immediately;
//! 3. in the background, try to replace the fallback list with relays scored from NIP-66
//!    relay discovery events.
//!
//! The current [`IndexerState`] is observable with [`IndexerDiscovery::subscribe_state`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_utility::{task, time};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use nostr::RelayUrl;
use tokio::sync::watch;

mod error;
pub mod nip66;
mod options;
pub mod ranking;

pub use self::error::Error;
pub use self::options::{DiscoveryOptions, FALLBACK_INDEXERS, MONITOR_RELAYS};
pub use self::ranking::{rank_relays, HttpRelayRanking, RankedRelay, RelayRanking};
use crate::relay::RelayConnection;
use crate::transport::{IntoWebSocketTransport, WebSocketTransport};

/// Candidates requested from the ranking service for each wanted indexer
const RANKING_OVERFETCH: usize = 4;

type PendingDiscovery = Shared<BoxFuture<'static, Vec<RelayUrl>>>;

/// Where the current indexer list comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IndexerSource {
    /// Nothing discovered yet
    #[default]
    None,
    /// Ranking service
    Ranking,
    /// Static fallback list
    Fallback,
    /// NIP-66 relay discovery events
    Nip66,
}

/// Current best-known indexers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerState {
    /// Indexers, most preferred first
    pub indexers: Vec<RelayUrl>,
    /// Source of [`IndexerState::indexers`]
    pub source: IndexerSource,
    /// A discovery (or the background upgrade) is running
    pub discovering: bool,
}

struct InnerIndexerDiscovery {
    transport: Arc<dyn WebSocketTransport>,
    ranking: Option<Arc<dyn RelayRanking>>,
    opts: DiscoveryOptions,
    state: watch::Sender<IndexerState>,
    pending: Mutex<Option<PendingDiscovery>>,
}

impl fmt::Debug for InnerIndexerDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerIndexerDiscovery")
            .field("ranking", &self.ranking)
            .field("opts", &self.opts)
            .field("state", &self.state)
            .finish()
    }
}

/// Indexer discovery service
///
/// Cheap to clone: clones share the same state.
#[derive(Debug, Clone)]
pub struct IndexerDiscovery {
    inner: Arc<InnerIndexerDiscovery>,
}

impl IndexerDiscovery {
    /// New discovery service
    ///
    /// Without a ranking service, discovery starts from the fallback list.
    pub fn new<T>(transport: T, ranking: Option<Arc<dyn RelayRanking>>, opts: DiscoveryOptions) -> Self
    where
        T: IntoWebSocketTransport,
    {
        let (state, ..) = watch::channel(IndexerState::default());
        Self {
            inner: Arc::new(InnerIndexerDiscovery {
                transport: transport.into_transport(),
                ranking,
                opts,
                state,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current state
    #[inline]
    pub fn state(&self) -> IndexerState {
        self.inner.state.borrow().clone()
    }

    /// Watch the state
    ///
    /// Changes made in a burst are coalesced: receivers only see the latest value.
    #[inline]
    pub fn subscribe_state(&self) -> watch::Receiver<IndexerState> {
        self.inner.state.subscribe()
    }

    /// Current indexers, most preferred first
    #[inline]
    pub fn indexers(&self) -> Vec<RelayUrl> {
        self.inner.state.borrow().indexers.clone()
    }

    /// Discover up to `count` indexers
    ///
    /// If a previous discovery completed, its result is returned immediately. Concurrent callers
    /// share the same pending discovery. Never fails: the worst case is the fallback list.
    pub async fn discover_indexers(&self, count: usize) -> Vec<RelayUrl> {
        let pending: PendingDiscovery = {
            let mut slot = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    {
                        let state = self.inner.state.borrow();
                        if state.source != IndexerSource::None {
                            return state.indexers.iter().take(count).cloned().collect();
                        }
                    }

                    let inner: Arc<InnerIndexerDiscovery> = self.inner.clone();
                    let pending: PendingDiscovery = async move { inner.discover(count).await }
                        .boxed()
                        .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }
}

impl InnerIndexerDiscovery {
    async fn discover(self: Arc<Self>, count: usize) -> Vec<RelayUrl> {
        self.state.send_modify(|s| s.discovering = true);

        let indexers: Vec<RelayUrl> = match self.from_ranking(count).await {
            Some(indexers) => {
                tracing::info!(count = indexers.len(), "Indexers discovered from ranking service.");
                self.publish(indexers.clone(), IndexerSource::Ranking, false);
                indexers
            }
            None => {
                let indexers: Vec<RelayUrl> = self
                    .opts
                    .fallback_relays
                    .iter()
                    .take(count)
                    .cloned()
                    .collect();

                tracing::info!(count = indexers.len(), "Using fallback indexers.");

                let upgrade: bool = self.opts.nip66 && !self.opts.monitor_relays.is_empty();
                self.publish(indexers.clone(), IndexerSource::Fallback, upgrade);

                if upgrade {
                    task::spawn(self.clone().upgrade_from_nip66(count));
                }

                indexers
            }
        };

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = None;

        indexers
    }

    async fn from_ranking(&self, count: usize) -> Option<Vec<RelayUrl>> {
        let ranking: &Arc<dyn RelayRanking> = self.ranking.as_ref()?;

        let limit: usize = count.saturating_mul(RANKING_OVERFETCH);
        let fut = ranking.ranked_relays(limit);

        match time::timeout(Some(self.opts.ranking_timeout), fut).await {
            Some(Ok(candidates)) => {
                let indexers: Vec<RelayUrl> = rank_relays(candidates, count);
                if indexers.is_empty() {
                    tracing::warn!("Ranking service returned no usable relays.");
                    None
                } else {
                    Some(indexers)
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ranking service failed.");
                None
            }
            None => {
                tracing::warn!(error = %Error::Timeout, "Ranking service failed.");
                None
            }
        }
    }

    async fn upgrade_from_nip66(self: Arc<Self>, count: usize) {
        let monitors: Vec<RelayConnection> = self
            .opts
            .monitor_relays
            .iter()
            .map(|url| {
                RelayConnection::with_opts(
                    url.clone(),
                    self.transport.clone(),
                    self.opts.relay.clone(),
                )
            })
            .collect();

        let candidates: Vec<RankedRelay> =
            nip66::collect(monitors, self.opts.nip66_window, self.opts.nip66_limit).await;
        let indexers: Vec<RelayUrl> = rank_relays(candidates, count);

        self.state.send_modify(|state| {
            state.discovering = false;

            if indexers.is_empty() {
                tracing::debug!("No NIP-66 candidates, keeping current indexers.");
                return;
            }

            // Only the fallback list is replaced
            if state.source == IndexerSource::Fallback {
                tracing::info!(count = indexers.len(), "Indexers upgraded from NIP-66.");
                state.indexers = indexers;
                state.source = IndexerSource::Nip66;
            }
        });
    }

    fn publish(&self, indexers: Vec<RelayUrl>, source: IndexerSource, discovering: bool) {
        self.state.send_replace(IndexerState {
            indexers,
            source,
            discovering,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use nostr::{Keys, Kind};
    use serde_json::json;

    use super::*;
    use crate::future::BoxedFuture;
    use crate::testing::{event_with_tags, tag, ScriptedRelay, ScriptedTransport};
    use crate::url::canonical_str;

    #[derive(Debug, Default)]
    struct StaticRanking {
        listing: serde_json::Value,
        delay: Option<Duration>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl RelayRanking for StaticRanking {
        fn ranked_relays(&self, _limit: usize) -> BoxedFuture<'_, Result<Vec<RankedRelay>, Error>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);

                if let Some(delay) = self.delay {
                    time::sleep(delay).await;
                }

                if self.fail {
                    return Err(Error::UnexpectedResponse);
                }

                ranking::parse_listing(&self.listing)
            })
        }
    }

    fn no_upgrade() -> DiscoveryOptions {
        DiscoveryOptions::default().nip66(false)
    }

    #[tokio::test]
    async fn test_failing_ranking_uses_fallback() {
        let ranking = Arc::new(StaticRanking {
            fail: true,
            ..Default::default()
        });
        let discovery = IndexerDiscovery::new(ScriptedTransport::new(), Some(ranking as Arc<dyn RelayRanking>), no_upgrade());

        let now = Instant::now();
        let indexers = discovery.discover_indexers(10).await;
        assert!(now.elapsed() < Duration::from_millis(500));

        let expected: Vec<&str> = FALLBACK_INDEXERS.iter().take(10).copied().collect();
        let indexers: Vec<&str> = indexers.iter().map(canonical_str).collect();
        assert_eq!(indexers, expected);

        let state = discovery.state();
        assert_eq!(state.source, IndexerSource::Fallback);
        assert!(!state.discovering);
    }

    #[tokio::test]
    async fn test_slow_ranking_times_out() {
        let ranking = Arc::new(StaticRanking {
            listing: json!(["wss://ranked.relay"]),
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let opts = no_upgrade().ranking_timeout(Duration::from_millis(50));
        let discovery = IndexerDiscovery::new(ScriptedTransport::new(), Some(ranking as Arc<dyn RelayRanking>), opts);

        let indexers = discovery.discover_indexers(3).await;
        assert_eq!(indexers.len(), 3);
        assert_eq!(discovery.state().source, IndexerSource::Fallback);
    }

    #[tokio::test]
    async fn test_ranking_orders_by_rtt() {
        let ranking = Arc::new(StaticRanking {
            listing: json!({"data": [
                {"url": "wss://slow.relay", "rtt": 400},
                {"url": "wss://fast.relay", "rtt": 20},
                {"url": "ws://hidden.onion", "rtt": 1},
            ]}),
            ..Default::default()
        });
        let discovery = IndexerDiscovery::new(ScriptedTransport::new(), Some(ranking as Arc<dyn RelayRanking>), no_upgrade());

        let indexers = discovery.discover_indexers(10).await;
        let indexers: Vec<&str> = indexers.iter().map(canonical_str).collect();
        assert_eq!(indexers, vec!["wss://fast.relay", "wss://slow.relay"]);
        assert_eq!(discovery.state().source, IndexerSource::Ranking);
    }

    #[tokio::test]
    async fn test_concurrent_discovery_runs_once() {
        let ranking = Arc::new(StaticRanking {
            listing: json!(["wss://ranked.relay"]),
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let discovery = IndexerDiscovery::new(
            ScriptedTransport::new(),
            Some(ranking.clone() as Arc<dyn RelayRanking>),
            no_upgrade(),
        );

        let (a, b) = tokio::join!(discovery.discover_indexers(5), discovery.discover_indexers(5));
        assert_eq!(a, b);
        assert_eq!(ranking.calls.load(Ordering::SeqCst), 1);

        // Completed: answered from state
        let c = discovery.discover_indexers(5).await;
        assert_eq!(a, c);
        assert_eq!(ranking.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nip66_upgrades_fallback() {
        let keys = Keys::generate();
        let discovery_event = |url: &str, rtt: &str| {
            event_with_tags(
                &keys,
                Kind::from(nip66::RELAY_DISCOVERY_KIND),
                "",
                100,
                [tag(&["d", url]), tag(&["rtt-open", rtt])],
            )
        };

        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://monitor.one").events([
            discovery_event("wss://slow.relay", "300"),
            discovery_event("wss://fast.relay", "30"),
        ]));
        transport.add(ScriptedRelay::new("wss://monitor.two").refuse());

        let opts = DiscoveryOptions::default()
            .monitor_relays(["wss://monitor.one", "wss://monitor.two"])
            .fallback_relays(["wss://fallback.one", "wss://fallback.two"]);
        let discovery = IndexerDiscovery::new(transport.clone(), None, opts);

        let mut state = discovery.subscribe_state();

        let indexers = discovery.discover_indexers(10).await;
        assert_eq!(indexers.len(), 2);
        assert_eq!(canonical_str(&indexers[0]), "wss://fallback.one");

        let upgraded = time::timeout(Some(Duration::from_secs(3)), async {
            loop {
                if state.borrow_and_update().source == IndexerSource::Nip66 {
                    return state.borrow().clone();
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let urls: Vec<&str> = upgraded.indexers.iter().map(canonical_str).collect();
        assert_eq!(urls, vec!["wss://fast.relay", "wss://slow.relay"]);
        assert!(!upgraded.discovering);

        // Monitor sessions are torn down
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.open_sessions("wss://monitor.one"), 0);
    }

    #[tokio::test]
    async fn test_nip66_without_candidates_keeps_fallback() {
        let transport = ScriptedTransport::new();
        transport.add(ScriptedRelay::new("wss://monitor.one"));

        let opts = DiscoveryOptions::default()
            .monitor_relays(["wss://monitor.one"])
            .fallback_relays(["wss://fallback.one"]);
        let discovery = IndexerDiscovery::new(transport, None, opts);
        let mut state = discovery.subscribe_state();

        discovery.discover_indexers(10).await;

        time::timeout(Some(Duration::from_secs(3)), async {
            while state.borrow_and_update().discovering {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let state = discovery.state();
        assert_eq!(state.source, IndexerSource::Fallback);
        assert_eq!(state.indexers.len(), 1);
    }
}
