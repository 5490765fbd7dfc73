// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::fmt;

/// Discovery error
///
/// Never surfaced by [`IndexerDiscovery::discover_indexers`](super::IndexerDiscovery::discover_indexers):
/// a failing tier just hands over to the next one.
#[derive(Debug)]
pub enum Error {
    /// HTTP error
    Http(reqwest::Error),
    /// Invalid endpoint URL
    Endpoint(String),
    /// The response isn't a relay listing
    UnexpectedResponse,
    /// Timeout
    Timeout,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => e.fmt(f),
            Self::Endpoint(e) => write!(f, "invalid endpoint: {e}"),
            Self::UnexpectedResponse => f.write_str("unexpected response"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}
