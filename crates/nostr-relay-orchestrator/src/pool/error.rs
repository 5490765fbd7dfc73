// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::fmt;

use nostr::RelayUrl;

use crate::{relay, url};

/// [`ConnectionPool`](super::ConnectionPool) error
#[derive(Debug)]
pub enum Error {
    /// Relay error
    Relay(relay::Error),
    /// Invalid relay URL
    Url(url::Error),
    /// Relay not found
    RelayNotFound(RelayUrl),
    /// Too many relays
    TooManyRelays {
        /// Max number allowed
        limit: usize,
    },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay(e) => e.fmt(f),
            Self::Url(e) => e.fmt(f),
            Self::RelayNotFound(url) => write!(f, "relay '{url}' not found"),
            Self::TooManyRelays { limit } => write!(f, "too many relays (limit: {limit})"),
        }
    }
}

impl From<relay::Error> for Error {
    fn from(e: relay::Error) -> Self {
        Self::Relay(e)
    }
}

impl From<url::Error> for Error {
    fn from(e: url::Error) -> Self {
        Self::Url(e)
    }
}
