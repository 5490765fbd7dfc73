// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay groups

use std::fmt;

/// Named group a pool relay belongs to
///
/// A relay may belong to several groups at once (e.g. a relay the user both reads from and
/// writes to).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelayGroup {
    /// Relays the user publishes to (NIP-65 `write`)
    Outbox,
    /// Relays the user reads mentions from (NIP-65 `read`)
    Inbox,
    /// Broad-coverage relays used for discovery
    Indexer,
    /// User-curated group
    Custom(String),
}

impl fmt::Display for RelayGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbox => f.write_str("outbox"),
            Self::Inbox => f.write_str("inbox"),
            Self::Indexer => f.write_str("indexer"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl RelayGroup {
    /// Custom group
    #[inline]
    pub fn custom<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self::Custom(name.into())
    }
}
