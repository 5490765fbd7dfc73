// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Popular relays
//!
//! Server-side ranking of the relays most users write to. Entries are `{url, count}` pairs;
//! `relay` is accepted for `url`, `users` and `frequency` for `count`.

use std::fmt;

use nostr::{RelayUrl, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::discovery::Error;
use crate::future::BoxedFuture;
use crate::url::normalize_relay_url;

/// A popular relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularRelay {
    /// Relay URL
    pub url: RelayUrl,
    /// Number of users
    pub count: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Number(u64),
    Text(String),
}

impl RawCount {
    fn get(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct RawPopularRelay {
    #[serde(alias = "relay")]
    url: String,
    #[serde(default, alias = "users", alias = "frequency")]
    count: Option<RawCount>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawListing {
    List(Vec<Value>),
    Wrapped {
        #[serde(alias = "data")]
        relays: Vec<Value>,
    },
}

impl PopularRelay {
    /// Normalize one entry of the popularity listing
    pub fn from_value(value: &Value) -> Option<Self> {
        let raw: RawPopularRelay = RawPopularRelay::deserialize(value).ok()?;

        Some(Self {
            url: normalize_relay_url(&raw.url).ok()?,
            count: raw.count.as_ref().and_then(RawCount::get).unwrap_or_default(),
        })
    }
}

/// Parse a popularity listing, most popular first
///
/// Accepts a JSON array or an object wrapping it in `relays` or `data`.
pub fn parse_popular(value: &Value) -> Result<Vec<PopularRelay>, Error> {
    let list: Vec<Value> = match RawListing::deserialize(value) {
        Ok(RawListing::List(list)) => list,
        Ok(RawListing::Wrapped { relays }) => relays,
        Err(..) => return Err(Error::UnexpectedResponse),
    };

    let mut relays: Vec<PopularRelay> = Vec::with_capacity(list.len());
    for relay in list.iter().filter_map(PopularRelay::from_value) {
        if !relays.iter().any(|r| r.url == relay.url) {
            relays.push(relay);
        }
    }

    relays.sort_by(|a, b| b.count.cmp(&a.count));

    Ok(relays)
}

/// Source of popular relays
pub trait PopularRelays: fmt::Debug + Send + Sync {
    /// Fetch up to `limit` relays, most popular first
    fn popular_relays(&self, limit: usize) -> BoxedFuture<'_, Result<Vec<PopularRelay>, Error>>;
}

/// Popularity endpoint reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpPopularRelays {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPopularRelays {
    /// New client
    pub fn new(endpoint: &str) -> Result<Self, Error> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: Url::parse(endpoint).map_err(|e| Error::Endpoint(e.to_string()))?,
        })
    }

    /// Use a custom HTTP client
    #[inline]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl PopularRelays for HttpPopularRelays {
    fn popular_relays(&self, limit: usize) -> BoxedFuture<'_, Result<Vec<PopularRelay>, Error>> {
        Box::pin(async move {
            let value: Value = self
                .client
                .get(self.endpoint.clone())
                .query(&[("limit", limit)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let mut relays: Vec<PopularRelay> = parse_popular(&value)?;
            relays.truncate(limit);
            Ok(relays)
        })
    }
}
