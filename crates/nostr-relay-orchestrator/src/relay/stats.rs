// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay connection stats

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nostr::Timestamp;

#[derive(Debug, Default)]
struct InnerRelayConnectionStats {
    attempts: AtomicUsize,
    success: AtomicUsize,
    bytes_sent: AtomicUsize,
    bytes_received: AtomicUsize,
    connected_at: AtomicU64,
    /// Last connection latency in millis (0 = never connected)
    latency_ms: AtomicU64,
}

/// Relay connection stats
#[derive(Debug, Clone, Default)]
pub struct RelayConnectionStats {
    inner: Arc<InnerRelayConnectionStats>,
}

impl RelayConnectionStats {
    /// The number of times a connection has been attempted
    #[inline]
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// The number of times a connection has been successfully established
    #[inline]
    pub fn success(&self) -> usize {
        self.inner.success.load(Ordering::SeqCst)
    }

    /// Bytes sent
    #[inline]
    pub fn bytes_sent(&self) -> usize {
        self.inner.bytes_sent.load(Ordering::SeqCst)
    }

    /// Bytes received
    #[inline]
    pub fn bytes_received(&self) -> usize {
        self.inner.bytes_received.load(Ordering::SeqCst)
    }

    /// Get the UNIX timestamp of the last started connection
    #[inline]
    pub fn connected_at(&self) -> Timestamp {
        Timestamp::from(self.inner.connected_at.load(Ordering::SeqCst))
    }

    /// Time needed to open the last session
    ///
    /// Used as round-trip-time estimate when ranking relays.
    pub fn latency(&self) -> Option<Duration> {
        match self.inner.latency_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    #[inline]
    pub(super) fn new_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn new_success(&self, latency: Duration) {
        self.inner.success.fetch_add(1, Ordering::SeqCst);

        let now: u64 = Timestamp::now().as_secs();
        self.inner.connected_at.store(now, Ordering::SeqCst);

        // Never store 0, it means "unknown"
        let ms: u64 = (latency.as_millis() as u64).max(1);
        self.inner.latency_ms.store(ms, Ordering::SeqCst);
    }

    #[inline]
    pub(super) fn add_bytes_sent(&self, size: usize) {
        self.inner.bytes_sent.fetch_add(size, Ordering::SeqCst);
    }

    #[inline]
    pub(super) fn add_bytes_received(&self, size: usize) {
        self.inner.bytes_received.fetch_add(size, Ordering::SeqCst);
    }
}
