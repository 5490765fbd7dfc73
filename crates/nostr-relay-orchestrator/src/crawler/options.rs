// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Crawler options

use std::time::Duration;

use crate::dedup::DEFAULT_DEDUP_CAPACITY;

const DEFAULT_MAX_RELAYS: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_POPULAR_REFRESH: Duration = Duration::from_secs(30 * 60);

/// Order in which relay sources are drawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SourcePriority {
    /// Connected pool relays, then popular relays, then indexers
    #[default]
    PoolFirst,
    /// Indexers, then popular relays, then connected pool relays
    IndexerFirst,
}

/// [`RelayCrawler`](super::RelayCrawler) options
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    pub(super) max_relays: usize,
    pub(super) timeout: Duration,
    pub(super) priority: SourcePriority,
    pub(super) idle_timeout: Duration,
    pub(super) sweep_interval: Duration,
    pub(super) dedup_capacity: usize,
    pub(super) popular_refresh: Duration,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            max_relays: DEFAULT_MAX_RELAYS,
            timeout: DEFAULT_TIMEOUT,
            priority: SourcePriority::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            popular_refresh: DEFAULT_POPULAR_REFRESH,
        }
    }
}

impl CrawlerOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default max relays per crawl (default: 10)
    #[inline]
    pub fn max_relays(mut self, num: usize) -> Self {
        self.max_relays = num;
        self
    }

    /// Default per-relay timeout, connection included (default: 6 secs)
    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default source priority
    #[inline]
    pub fn priority(mut self, priority: SourcePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Disconnect crawler connections unused for this long (default: 60 secs)
    #[inline]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Interval of the idle sweep (default: 15 secs)
    #[inline]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Capacity of the per-crawl dedup set (default: 20000)
    #[inline]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Min interval between popular relay refreshes (default: 30 min)
    #[inline]
    pub fn popular_refresh(mut self, interval: Duration) -> Self {
        self.popular_refresh = interval;
        self
    }
}
