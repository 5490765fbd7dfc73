// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay URL canonicalization
//!
//! Relay URLs arrive from many places (relay lists, ranking endpoints, discovery events)
//! and in many cosmetic variants. Every map in this crate is keyed by the canonical form:
//!
//! - surrounding whitespace removed
//! - trailing slashes removed
//! - scheme and host lowercased
//! - only `ws://` and `wss://` accepted

use std::fmt;

use nostr::{RelayUrl, Url};

/// Relay URL error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Empty string
    Empty,
    /// Scheme is not `ws` or `wss`
    UnsupportedScheme(String),
    /// Can't parse URL
    Invalid(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty relay url"),
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported relay url scheme: {scheme}"),
            Self::Invalid(e) => write!(f, "invalid relay url: {e}"),
        }
    }
}

/// Network class of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelayNetwork {
    /// Directly reachable relay
    Clearnet,
    /// Tor hidden service
    Tor,
    /// I2P
    I2p,
    /// Lokinet
    Loki,
}

impl RelayNetwork {
    /// Parse the network labels used by relay monitors and ranking services.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "clearnet" | "clear" | "internet" => Some(Self::Clearnet),
            "tor" | "onion" => Some(Self::Tor),
            "i2p" => Some(Self::I2p),
            "loki" | "lokinet" => Some(Self::Loki),
            _ => None,
        }
    }

    /// Network class inferred from the host of the URL
    pub fn from_url(url: &RelayUrl) -> Self {
        let host: String = Url::parse(url.as_str())
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default();

        if host.ends_with(".onion") {
            Self::Tor
        } else if host.ends_with(".i2p") {
            Self::I2p
        } else if host.ends_with(".loki") {
            Self::Loki
        } else {
            Self::Clearnet
        }
    }
}

/// Canonicalize a relay URL.
pub fn normalize_relay_url(url: &str) -> Result<RelayUrl, Error> {
    let trimmed: &str = url.trim().trim_end_matches('/');

    if trimmed.is_empty() {
        return Err(Error::Empty);
    }

    let scheme: String = match trimmed.split_once("://") {
        Some((scheme, ..)) => scheme.to_ascii_lowercase(),
        None => return Err(Error::Invalid(trimmed.to_string())),
    };

    if scheme != "ws" && scheme != "wss" {
        return Err(Error::UnsupportedScheme(scheme));
    }

    RelayUrl::parse(trimmed).map_err(|e| Error::Invalid(e.to_string()))
}

/// Check if the relay is directly reachable (not an overlay network)
#[inline]
pub fn is_clearnet(url: &RelayUrl) -> bool {
    RelayNetwork::from_url(url) == RelayNetwork::Clearnet
}

/// Canonical string form (no trailing slash)
#[inline]
pub fn canonical_str(url: &RelayUrl) -> &str {
    url.as_str().trim_end_matches('/')
}

/// Canonicalize many URLs, dropping invalid ones and duplicates while keeping the order.
pub fn normalize_relay_urls<I, S>(urls: I) -> Vec<RelayUrl>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<RelayUrl> = Vec::new();
    for url in urls.into_iter() {
        match normalize_relay_url(url.as_ref()) {
            Ok(url) => {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
            Err(e) => tracing::trace!(url = %url.as_ref(), error = %e, "Skipping relay url."),
        }
    }
    out
}
