// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay crawler
//!
//! Answers one-off queries across many relays. Connected pool relays are reused, crawler
//! connections are kept for later crawls and disconnected once idle.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_utility::{task, time};
use futures::future::{self, AbortHandle, Abortable};
use nostr::prelude::*;
use tokio::sync::Mutex;

mod options;
pub mod popular;

pub use self::options::{CrawlerOptions, SourcePriority};
pub use self::popular::{HttpPopularRelays, PopularRelay, PopularRelays};
use crate::dedup::DedupSet;
use crate::discovery::IndexerDiscovery;
use crate::pool::ConnectionPool;
use crate::relay::{RelayConnection, RelayOptions};

/// Where a crawler relay comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelaySource {
    /// Popular relays listing
    Popular,
    /// Indexer discovery
    Indexer,
    /// Connection pool (never evicted)
    Pool,
}

impl fmt::Display for RelaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Popular => f.write_str("popular"),
            Self::Indexer => f.write_str("indexer"),
            Self::Pool => f.write_str("pool"),
        }
    }
}

/// A relay used by the crawler
#[derive(Debug, Clone)]
pub struct CrawlerRelay {
    relay: RelayConnection,
    source: RelaySource,
    last_used: Instant,
    /// Crawls currently using the relay
    in_flight: usize,
    /// Deadline of the longest running crawl
    busy_until: Option<Instant>,
}

impl CrawlerRelay {
    /// Relay URL
    #[inline]
    pub fn url(&self) -> &RelayUrl {
        self.relay.url()
    }

    /// Connection
    #[inline]
    pub fn relay(&self) -> &RelayConnection {
        &self.relay
    }

    /// Source
    #[inline]
    pub fn source(&self) -> RelaySource {
        self.source
    }

    /// Last time a crawl used this relay
    #[inline]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Latency of the last successful connection
    #[inline]
    pub fn rtt(&self) -> Option<Duration> {
        self.relay.stats().latency()
    }

    /// Connection attempts
    #[inline]
    pub fn connect_attempts(&self) -> usize {
        self.relay.stats().attempts()
    }

    /// Check if the relay is in use at `now`
    ///
    /// A crawl dropped before completion stops counting once its deadline passed.
    fn is_busy(&self, now: Instant) -> bool {
        self.in_flight > 0 && self.busy_until.is_some_and(|deadline| now < deadline)
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.source != RelaySource::Pool
            && !self.is_busy(now)
            && now.saturating_duration_since(self.last_used) > idle_timeout
    }

    fn acquire(&mut self, now: Instant, timeout: Duration) {
        let deadline: Instant = now + timeout;
        self.last_used = now;
        self.in_flight += 1;
        self.busy_until = Some(match self.busy_until {
            Some(current) if current > deadline => current,
            _ => deadline,
        });
    }

    fn release(&mut self, now: Instant) {
        self.last_used = now;
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.busy_until = None;
        }
    }
}

/// A crawl
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    filters: Vec<Filter>,
    max_relays: Option<usize>,
    timeout: Option<Duration>,
    priority: Option<SourcePriority>,
}

impl CrawlRequest {
    /// New crawl with the default options of the crawler
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            max_relays: None,
            timeout: None,
            priority: None,
        }
    }

    /// Max relays to ask
    #[inline]
    pub fn max_relays(mut self, num: usize) -> Self {
        self.max_relays = Some(num);
        self
    }

    /// Per-relay timeout, connection included
    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Source priority
    #[inline]
    pub fn priority(mut self, priority: SourcePriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Debug, Default)]
struct PopularCache {
    relays: Vec<RelayUrl>,
    fetched_at: Option<Instant>,
}

struct InnerRelayCrawler {
    pool: ConnectionPool,
    discovery: IndexerDiscovery,
    popular: Option<Arc<dyn PopularRelays>>,
    opts: CrawlerOptions,
    relays: Mutex<HashMap<RelayUrl, CrawlerRelay>>,
    popular_cache: Mutex<PopularCache>,
    sweeper: StdMutex<Option<AbortHandle>>,
}

impl fmt::Debug for InnerRelayCrawler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerRelayCrawler")
            .field("popular", &self.popular)
            .field("opts", &self.opts)
            .finish()
    }
}

impl Drop for InnerRelayCrawler {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

/// Relay crawler
///
/// Cheap to clone: clones share the same connections.
#[derive(Debug, Clone)]
pub struct RelayCrawler {
    inner: Arc<InnerRelayCrawler>,
}

impl RelayCrawler {
    /// New crawler
    pub fn new(
        pool: ConnectionPool,
        discovery: IndexerDiscovery,
        popular: Option<Arc<dyn PopularRelays>>,
        opts: CrawlerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(InnerRelayCrawler {
                pool,
                discovery,
                popular,
                opts,
                relays: Mutex::new(HashMap::new()),
                popular_cache: Mutex::new(PopularCache::default()),
                sweeper: StdMutex::new(None),
            }),
        }
    }

    /// Snapshot of the relays used by the crawler
    pub async fn relays(&self) -> Vec<CrawlerRelay> {
        let relays = self.inner.relays.lock().await;
        relays.values().cloned().collect()
    }

    /// Run a crawl
    ///
    /// Never fails: a slow or broken relay contributes nothing. Events are deduplicated and
    /// sorted newest first.
    pub async fn crawl(&self, request: CrawlRequest) -> Vec<Event> {
        let max_relays: usize = request.max_relays.unwrap_or(self.inner.opts.max_relays);
        let timeout: Duration = request.timeout.unwrap_or(self.inner.opts.timeout);
        let priority: SourcePriority = request.priority.unwrap_or(self.inner.opts.priority);

        let targets: Vec<CrawlerRelay> = self.inner.select(max_relays, priority, timeout).await;

        if targets.is_empty() {
            tracing::debug!("No relay to crawl.");
            return Vec::new();
        }

        tracing::debug!(relays = targets.len(), "Crawling.");

        let results: Vec<Vec<Event>> = future::join_all(
            targets
                .iter()
                .map(|target| self.inner.query(target, request.filters.clone(), timeout)),
        )
        .await;

        self.inner.touch(&targets).await;
        self.inner.ensure_sweeper();

        let mut dedup: DedupSet = DedupSet::new(self.inner.opts.dedup_capacity);
        let mut events: Vec<Event> = results
            .into_iter()
            .flatten()
            .filter(|event| dedup.insert(event.id))
            .collect();

        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events
    }

    /// Disconnect and forget the crawler relays idle for longer than the idle timeout
    ///
    /// Pool relays are never evicted. Returns the evicted URLs.
    #[inline]
    pub async fn evict_idle(&self) -> Vec<RelayUrl> {
        self.inner.evict_idle_at(Instant::now()).await
    }

    /// Same as [`RelayCrawler::evict_idle`], as if it ran at `now`
    #[inline]
    pub async fn evict_idle_at(&self, now: Instant) -> Vec<RelayUrl> {
        self.inner.evict_idle_at(now).await
    }

    #[cfg(test)]
    fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl InnerRelayCrawler {
    /// Pick the relays of a crawl, by source priority
    async fn select(
        &self,
        max_relays: usize,
        priority: SourcePriority,
        timeout: Duration,
    ) -> Vec<CrawlerRelay> {
        let pool: Vec<RelayUrl> = self
            .pool
            .connected_relays()
            .await
            .iter()
            .map(|r| r.url().clone())
            .collect();
        let popular: Vec<RelayUrl> = self.popular_relays(max_relays).await;
        let indexers: Vec<RelayUrl> = self.discovery.discover_indexers(max_relays).await;

        let sources = match priority {
            SourcePriority::PoolFirst => [
                (RelaySource::Pool, pool),
                (RelaySource::Popular, popular),
                (RelaySource::Indexer, indexers),
            ],
            SourcePriority::IndexerFirst => [
                (RelaySource::Indexer, indexers),
                (RelaySource::Popular, popular),
                (RelaySource::Pool, pool),
            ],
        };

        let mut relays = self.relays.lock().await;
        let mut targets: Vec<CrawlerRelay> = Vec::with_capacity(max_relays);

        for (source, urls) in sources.into_iter() {
            for url in urls.into_iter() {
                if targets.len() >= max_relays {
                    return targets;
                }

                if targets.iter().any(|t| t.url() == &url) {
                    continue;
                }

                let now: Instant = Instant::now();

                let target: CrawlerRelay = match relays.get_mut(&url) {
                    Some(known) => {
                        known.acquire(now, timeout);
                        known.clone()
                    }
                    None => {
                        // Pool-owned relays are never evicted, whatever source listed them
                        let (relay, source) = match self.pool.relay(url.as_str()).await {
                            Some(relay) => (relay, RelaySource::Pool),
                            None => {
                                let opts: RelayOptions =
                                    self.pool.relay_opts().clone().connection_timeout(timeout);
                                let relay: RelayConnection = RelayConnection::with_opts(
                                    url.clone(),
                                    self.pool.transport(),
                                    opts,
                                );
                                (relay, source)
                            }
                        };

                        let mut target = CrawlerRelay {
                            relay,
                            source,
                            last_used: now,
                            in_flight: 0,
                            busy_until: None,
                        };
                        target.acquire(now, timeout);
                        relays.insert(url, target.clone());
                        target
                    }
                };

                targets.push(target);
            }
        }

        targets
    }

    async fn popular_relays(&self, limit: usize) -> Vec<RelayUrl> {
        let Some(popular) = &self.popular else {
            return Vec::new();
        };

        let mut cache = self.popular_cache.lock().await;

        if let Some(fetched_at) = cache.fetched_at {
            if fetched_at.elapsed() < self.opts.popular_refresh {
                return cache.relays.clone();
            }
        }

        match time::timeout(Some(self.opts.timeout), popular.popular_relays(limit)).await {
            Some(Ok(relays)) => {
                tracing::debug!(count = relays.len(), "Popular relays refreshed.");
                cache.relays = relays.into_iter().map(|r| r.url).collect();
            }
            Some(Err(e)) => tracing::warn!(error = %e, "Can't fetch popular relays."),
            None => tracing::warn!("Timeout while fetching popular relays."),
        }

        // Failures also wait for the next refresh window
        cache.fetched_at = Some(Instant::now());

        cache.relays.clone()
    }

    async fn query(&self, target: &CrawlerRelay, filters: Vec<Filter>, timeout: Duration) -> Vec<Event> {
        let relay: &RelayConnection = target.relay();
        let started: Instant = Instant::now();

        relay.connect().await;

        if !relay.is_connected() {
            tracing::debug!(url = %relay.url(), status = %relay.status(), "Crawler relay unreachable.");
            return Vec::new();
        }

        let remaining: Duration = timeout.saturating_sub(started.elapsed());

        match relay.fetch_events(filters).timeout(remaining).await {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(url = %relay.url(), error = %e, "Crawl query failed.");
                Vec::new()
            }
        }
    }

    async fn touch(&self, targets: &[CrawlerRelay]) {
        let now: Instant = Instant::now();
        let mut relays = self.relays.lock().await;
        for target in targets.iter() {
            if let Some(entry) = relays.get_mut(target.url()) {
                entry.release(now);
            }
        }
    }

    async fn evict_idle_at(&self, now: Instant) -> Vec<RelayUrl> {
        let mut relays = self.relays.lock().await;

        let idle: Vec<RelayUrl> = relays
            .iter()
            .filter(|(.., r)| r.is_idle(now, self.opts.idle_timeout))
            .map(|(url, ..)| url.clone())
            .collect();

        for url in idle.iter() {
            if let Some(entry) = relays.remove(url) {
                entry.relay.disconnect();
                tracing::debug!(url = %url, source = %entry.source, "Idle crawler relay evicted.");
            }
        }

        idle
    }

    async fn has_evictable(&self) -> bool {
        let relays = self.relays.lock().await;
        relays.values().any(|r| r.source != RelaySource::Pool)
    }

    /// Start the idle sweep if not running
    ///
    /// The sweep stops by itself once only pool relays remain.
    fn ensure_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);

        if sweeper.is_some() {
            return;
        }

        let (handle, registration) = AbortHandle::new_pair();

        let inner: Weak<Self> = Arc::downgrade(self);
        let interval: Duration = self.opts.sweep_interval;

        task::spawn(Abortable::new(
            async move {
                loop {
                    time::sleep(interval).await;

                    let Some(inner) = inner.upgrade() else {
                        break;
                    };

                    inner.evict_idle_at(Instant::now()).await;

                    if !inner.has_evictable().await {
                        *inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = None;
                        tracing::trace!("Idle sweep stopped.");
                        break;
                    }
                }
            },
            registration,
        ));

        *sweeper = Some(handle);
    }

    fn stop_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
    }
}
