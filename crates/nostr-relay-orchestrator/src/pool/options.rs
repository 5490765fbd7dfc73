// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Pool options

use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::relay::RelayOptions;

/// [`ConnectionPool`](super::ConnectionPool) options
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub(super) relay: RelayOptions,
    pub(super) max_relays: Option<usize>,
    pub(super) dedup_capacity: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            relay: RelayOptions::default(),
            max_relays: None,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl PoolOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options applied to every relay added to the pool
    #[inline]
    pub fn relay(mut self, opts: RelayOptions) -> Self {
        self.relay = opts;
        self
    }

    /// Max relays (default: None)
    #[inline]
    pub fn max_relays(mut self, num: Option<usize>) -> Self {
        self.max_relays = num;
        self
    }

    /// Capacity of the cross-relay dedup set of each pool subscription (default: 20000)
    #[inline]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Get relay options
    #[inline]
    pub fn get_relay_opts(&self) -> &RelayOptions {
        &self.relay
    }
}
