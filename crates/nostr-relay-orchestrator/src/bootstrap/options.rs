// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Bootstrap options

use std::time::Duration;

const DEFAULT_INDEXER_COUNT: usize = 10;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_REFRESH_INDEXERS: usize = 3;

/// [`BootstrapOrchestrator`](super::BootstrapOrchestrator) options
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub(super) indexer_count: usize,
    pub(super) query_timeout: Duration,
    pub(super) refresh: bool,
    pub(super) refresh_interval: Duration,
    pub(super) refresh_indexers: usize,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            indexer_count: DEFAULT_INDEXER_COUNT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            refresh: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_indexers: DEFAULT_REFRESH_INDEXERS,
        }
    }
}

impl BootstrapOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexers to discover (default: 10)
    #[inline]
    pub fn indexer_count(mut self, count: usize) -> Self {
        self.indexer_count = count;
        self
    }

    /// Ceiling of the indexer query phase (default: 8 secs)
    #[inline]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Periodically refresh profile, relay list and contacts once ready (default: true)
    #[inline]
    pub fn refresh(mut self, enable: bool) -> Self {
        self.refresh = enable;
        self
    }

    /// Interval between refreshes (default: 60 min)
    #[inline]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Max indexers asked on each refresh (default: 3)
    #[inline]
    pub fn refresh_indexers(mut self, num: usize) -> Self {
        self.refresh_indexers = num;
        self
    }
}
