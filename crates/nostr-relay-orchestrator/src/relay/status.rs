// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Connection state

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug)]
pub(super) struct AtomicConnectionState {
    value: AtomicU8,
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

impl AtomicConnectionState {
    #[inline]
    pub(super) fn new(state: ConnectionState) -> Self {
        Self {
            value: AtomicU8::new(state as u8),
        }
    }

    /// Store the new state and return the previous one
    #[inline]
    pub(super) fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.value.swap(state as u8, Ordering::SeqCst))
    }

    #[inline]
    pub(super) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.value.load(Ordering::SeqCst))
    }
}

/// Session state of a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// No session. Initial state, and the state after [`disconnect`](super::RelayConnection::disconnect).
    Disconnected = 0,
    /// Connection attempt in progress.
    Connecting = 1,
    /// Session established.
    Connected = 2,
    /// The last connection attempt failed or the session broke.
    Error = 3,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl ConnectionState {
    #[inline]
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }

    /// Check if is [`ConnectionState::Connected`]
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if is [`ConnectionState::Connecting`]
    #[inline]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Check if the connection is down (`disconnected` or `error`)
    #[inline]
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}
