// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Session
//!
//! Composition root: one pool, one indexer discovery, one bootstrap orchestrator and one
//! crawler, sharing the same transport, cache and signer.

use std::sync::Arc;

use nostr::prelude::*;

use crate::bootstrap::{BootstrapOptions, BootstrapOrchestrator};
use crate::cache::EventCache;
use crate::crawler::{CrawlerOptions, PopularRelays, RelayCrawler};
use crate::discovery::{DiscoveryOptions, IndexerDiscovery, RelayRanking};
use crate::notifications::{NotificationClassifier, NotificationOptions, WatermarkStore};
use crate::pool::{ConnectionPool, PoolOptions};
use crate::transport::{DefaultWebsocketTransport, IntoWebSocketTransport, WebSocketTransport};

/// Session builder
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    /// WebSocket transport
    pub transport: Arc<dyn WebSocketTransport>,
    /// Signer used to answer relay `AUTH` challenges
    pub signer: Option<Arc<dyn NostrSigner>>,
    /// Event cache
    pub cache: Option<Arc<dyn EventCache>>,
    /// Relay ranking source
    pub ranking: Option<Arc<dyn RelayRanking>>,
    /// Relay popularity source
    pub popular: Option<Arc<dyn PopularRelays>>,
    /// Pool options
    pub pool_opts: PoolOptions,
    /// Discovery options
    pub discovery_opts: DiscoveryOptions,
    /// Bootstrap options
    pub bootstrap_opts: BootstrapOptions,
    /// Crawler options
    pub crawler_opts: CrawlerOptions,
    /// Notification options
    pub notification_opts: NotificationOptions,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            transport: Arc::new(DefaultWebsocketTransport),
            signer: None,
            cache: None,
            ranking: None,
            popular: None,
            pool_opts: PoolOptions::default(),
            discovery_opts: DiscoveryOptions::default(),
            bootstrap_opts: BootstrapOptions::default(),
            crawler_opts: CrawlerOptions::default(),
            notification_opts: NotificationOptions::default(),
        }
    }
}

impl SessionBuilder {
    /// New default builder
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom WebSocket transport
    ///
    /// By default [`DefaultWebsocketTransport`] is used.
    #[inline]
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: IntoWebSocketTransport,
    {
        self.transport = transport.into_transport();
        self
    }

    /// Set signer
    #[inline]
    pub fn signer<T>(mut self, signer: T) -> Self
    where
        T: IntoNostrSigner,
    {
        self.signer = Some(signer.into_nostr_signer());
        self
    }

    /// Set event cache
    #[inline]
    pub fn cache<C>(mut self, cache: C) -> Self
    where
        C: EventCache + 'static,
    {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Set relay ranking source
    #[inline]
    pub fn ranking<R>(mut self, ranking: R) -> Self
    where
        R: RelayRanking + 'static,
    {
        self.ranking = Some(Arc::new(ranking));
        self
    }

    /// Set relay popularity source
    #[inline]
    pub fn popular<P>(mut self, popular: P) -> Self
    where
        P: PopularRelays + 'static,
    {
        self.popular = Some(Arc::new(popular));
        self
    }

    /// Set pool options
    #[inline]
    pub fn pool_opts(mut self, opts: PoolOptions) -> Self {
        self.pool_opts = opts;
        self
    }

    /// Set discovery options
    #[inline]
    pub fn discovery_opts(mut self, opts: DiscoveryOptions) -> Self {
        self.discovery_opts = opts;
        self
    }

    /// Set bootstrap options
    #[inline]
    pub fn bootstrap_opts(mut self, opts: BootstrapOptions) -> Self {
        self.bootstrap_opts = opts;
        self
    }

    /// Set crawler options
    #[inline]
    pub fn crawler_opts(mut self, opts: CrawlerOptions) -> Self {
        self.crawler_opts = opts;
        self
    }

    /// Set notification options
    #[inline]
    pub fn notification_opts(mut self, opts: NotificationOptions) -> Self {
        self.notification_opts = opts;
        self
    }

    /// Build [`Session`]
    #[inline]
    pub fn build(self) -> Session {
        Session::from_builder(self)
    }
}

/// Session
///
/// Cheap to clone: clones share the same components.
#[derive(Debug, Clone)]
pub struct Session {
    pool: ConnectionPool,
    discovery: IndexerDiscovery,
    bootstrap: BootstrapOrchestrator,
    crawler: RelayCrawler,
    notification_opts: NotificationOptions,
}

impl Default for Session {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Session {
    /// New session with default components
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session builder
    #[inline]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    fn from_builder(builder: SessionBuilder) -> Self {
        let pool = ConnectionPool::with_transport(builder.transport.clone(), builder.pool_opts);
        pool.store_signer(builder.signer);

        let discovery = IndexerDiscovery::new(
            builder.transport,
            builder.ranking,
            builder.discovery_opts,
        );

        let bootstrap = BootstrapOrchestrator::new(
            pool.clone(),
            discovery.clone(),
            builder.cache,
            builder.bootstrap_opts,
        );

        let crawler = RelayCrawler::new(
            pool.clone(),
            discovery.clone(),
            builder.popular,
            builder.crawler_opts,
        );

        Self {
            pool,
            discovery,
            bootstrap,
            crawler,
            notification_opts: builder.notification_opts,
        }
    }

    /// Connection pool
    #[inline]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Indexer discovery
    #[inline]
    pub fn discovery(&self) -> &IndexerDiscovery {
        &self.discovery
    }

    /// Bootstrap orchestrator
    #[inline]
    pub fn bootstrap(&self) -> &BootstrapOrchestrator {
        &self.bootstrap
    }

    /// Relay crawler
    #[inline]
    pub fn crawler(&self) -> &RelayCrawler {
        &self.crawler
    }

    /// Build a notification classifier for `public_key`, backed by the pool relays
    ///
    /// Call [`NotificationClassifier::start`] once the inbox relays are connected.
    pub fn notifications(
        &self,
        public_key: PublicKey,
        store: Arc<dyn WatermarkStore>,
    ) -> NotificationClassifier {
        NotificationClassifier::new(
            self.pool.clone(),
            public_key,
            store,
            self.notification_opts.clone(),
        )
    }

    /// Replace the signer used to answer relay `AUTH` challenges
    pub async fn set_signer(&self, signer: Option<Arc<dyn NostrSigner>>) {
        self.pool.set_auth_signer(signer).await;
    }

    /// Reset the bootstrap, disconnect the pool and drop the signer
    pub async fn logout(&self) {
        self.bootstrap.reset();
        self.pool.disconnect_all().await;
        self.pool.set_auth_signer(None).await;

        tracing::info!("Logged out.");
    }
}
