// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Discovery options

use std::time::Duration;

use nostr::RelayUrl;

use crate::relay::RelayOptions;
use crate::url::normalize_relay_urls;

/// Well-known relays adopted when the ranking service is unavailable
pub const FALLBACK_INDEXERS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.primal.net",
    "wss://purplepag.es",
    "wss://nostr.wine",
    "wss://relay.snort.social",
    "wss://nostr.mom",
    "wss://offchain.pub",
    "wss://relay.nostr.bg",
    "wss://nostr.oxtr.dev",
    "wss://relay.nos.social",
    "wss://nostr-pub.wellorder.net",
    "wss://relay.mostr.pub",
];

/// Relays publishing NIP-66 relay discovery events
pub const MONITOR_RELAYS: &[&str] = &[
    "wss://relay.nostr.watch",
    "wss://history.nostr.watch",
    "wss://monitorlizard.nostr1.com",
];

const DEFAULT_RANKING_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_NIP66_WINDOW: Duration = Duration::from_secs(8);
const DEFAULT_NIP66_LIMIT: usize = 500;

/// [`IndexerDiscovery`](super::IndexerDiscovery) options
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub(super) ranking_timeout: Duration,
    pub(super) nip66: bool,
    pub(super) nip66_window: Duration,
    pub(super) nip66_limit: usize,
    pub(super) monitor_relays: Vec<RelayUrl>,
    pub(super) fallback_relays: Vec<RelayUrl>,
    pub(super) relay: RelayOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ranking_timeout: DEFAULT_RANKING_TIMEOUT,
            nip66: true,
            nip66_window: DEFAULT_NIP66_WINDOW,
            nip66_limit: DEFAULT_NIP66_LIMIT,
            monitor_relays: normalize_relay_urls(MONITOR_RELAYS),
            fallback_relays: normalize_relay_urls(FALLBACK_INDEXERS),
            relay: RelayOptions::default(),
        }
    }
}

impl DiscoveryOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout of the ranking service query (default: 5 secs)
    #[inline]
    pub fn ranking_timeout(mut self, timeout: Duration) -> Self {
        self.ranking_timeout = timeout;
        self
    }

    /// Enable the background NIP-66 upgrade after falling back (default: true)
    #[inline]
    pub fn nip66(mut self, enable: bool) -> Self {
        self.nip66 = enable;
        self
    }

    /// How long to collect relay discovery events from the monitors (default: 8 secs)
    #[inline]
    pub fn nip66_window(mut self, window: Duration) -> Self {
        self.nip66_window = window;
        self
    }

    /// Max relay discovery events requested from each monitor (default: 500)
    #[inline]
    pub fn nip66_limit(mut self, limit: usize) -> Self {
        self.nip66_limit = limit;
        self
    }

    /// Monitor relays queried for NIP-66 events
    ///
    /// Invalid URLs are skipped.
    pub fn monitor_relays<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.monitor_relays = normalize_relay_urls(urls);
        self
    }

    /// Static fallback list, in order of preference
    ///
    /// Invalid URLs are skipped.
    pub fn fallback_relays<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fallback_relays = normalize_relay_urls(urls);
        self
    }

    /// Options of the monitor connections
    #[inline]
    pub fn relay(mut self, opts: RelayOptions) -> Self {
        self.relay = opts;
        self
    }

    /// Get the fallback list
    #[inline]
    pub fn get_fallback_relays(&self) -> &[RelayUrl] {
        &self.fallback_relays
    }
}
