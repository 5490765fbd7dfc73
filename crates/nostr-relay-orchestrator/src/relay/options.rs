// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay options

use std::time::Duration;

use async_wsocket::ConnectionMode;

use super::constants::{
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MESSAGE_QUEUE_SIZE, DEFAULT_NOTIFICATION_CHANNEL_SIZE,
    MAX_MESSAGE_SIZE,
};

/// [`RelayConnection`](super::RelayConnection) options
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub(super) connection_mode: ConnectionMode,
    pub(super) connection_timeout: Duration,
    pub(super) notification_channel_size: usize,
    pub(super) message_queue_size: usize,
    pub(super) max_message_size: Option<usize>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            notification_channel_size: DEFAULT_NOTIFICATION_CHANNEL_SIZE,
            message_queue_size: DEFAULT_MESSAGE_QUEUE_SIZE,
            max_message_size: Some(MAX_MESSAGE_SIZE),
        }
    }
}

impl RelayOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection mode
    #[inline]
    pub fn connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Max time to wait for the session to open (default: 10 secs)
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Notification channel size (default: 2048)
    #[inline]
    pub fn notification_channel_size(mut self, size: usize) -> Self {
        self.notification_channel_size = size;
        self
    }

    /// Max size of a single relay message (default: 5 MB)
    #[inline]
    pub fn max_message_size(mut self, size: Option<usize>) -> Self {
        self.max_message_size = size;
        self
    }

    /// Get the connection timeout
    #[inline]
    pub fn get_connection_timeout(&self) -> Duration {
        self.connection_timeout
    }
}
