// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay ranking
//!
//! Ranking services and relay monitors describe relays with many slightly different JSON
//! shapes. [`RankedRelay::from_value`] is the single place where they are normalized.
//!
//! Accepted field names:
//!
//! | Field     | Names                                                                         |
//! |-----------|-------------------------------------------------------------------------------|
//! | url       | `url`, `relay_url`, `relayUrl`, `relay`, `address`                            |
//! | rtt (ms)  | `rtt`, `rtt_open`, `rttOpen`, `rtt_ms`, `latency`, `latency_ms`, `rtt.open`   |
//! | last seen | `last_seen`, `lastSeen`, `last_seen_at`, `updated_at`, `updatedAt`, `last_online` |
//! | network   | `network`, `net`, `network_type`                                              |
//!
//! Numbers may be encoded as strings. Timestamps in milliseconds are converted to seconds.
//! Without a network field, the network is inferred from the URL host.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use nostr::{RelayUrl, Timestamp, Url};
use serde_json::Value;

use super::error::Error;
use crate::future::BoxedFuture;
use crate::url::{normalize_relay_url, RelayNetwork};

const URL_FIELDS: &[&str] = &["url", "relay_url", "relayUrl", "relay", "address"];
const RTT_FIELDS: &[&str] = &["rtt", "rtt_open", "rttOpen", "rtt_ms", "latency", "latency_ms"];
const LAST_SEEN_FIELDS: &[&str] = &[
    "last_seen",
    "lastSeen",
    "last_seen_at",
    "updated_at",
    "updatedAt",
    "last_online",
];
const NETWORK_FIELDS: &[&str] = &["network", "net", "network_type"];
const LIST_FIELDS: &[&str] = &["relays", "data", "results", "items"];

/// Anything above is a timestamp in milliseconds
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// A ranking candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedRelay {
    /// Canonical relay URL
    pub url: RelayUrl,
    /// Measured round-trip time
    pub rtt: Option<Duration>,
    /// Last time the relay was observed online
    pub last_seen: Option<Timestamp>,
    /// Network class
    pub network: RelayNetwork,
}

impl RankedRelay {
    /// Candidate with only a URL
    pub fn new(url: RelayUrl) -> Self {
        let network: RelayNetwork = RelayNetwork::from_url(&url);
        Self {
            url,
            rtt: None,
            last_seen: None,
            network,
        }
    }

    /// Normalize one entry of a ranking response
    ///
    /// A bare string is accepted as a URL. Returns `None` if no valid relay URL is found.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(url) = value.as_str() {
            return normalize_relay_url(url).ok().map(Self::new);
        }

        let object = value.as_object()?;

        let url: RelayUrl = URL_FIELDS
            .iter()
            .filter_map(|f| object.get(*f).and_then(Value::as_str))
            .find_map(|u| normalize_relay_url(u).ok())?;

        let rtt: Option<Duration> = RTT_FIELDS
            .iter()
            .filter_map(|f| object.get(*f))
            .find_map(|v| {
                // `{"rtt": {"open": 120, "read": 80}}`
                match v.get("open") {
                    Some(open) => as_f64(open),
                    None => as_f64(v),
                }
            })
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| Duration::from_micros((ms * 1000.0) as u64));

        let last_seen: Option<Timestamp> = LAST_SEEN_FIELDS
            .iter()
            .filter_map(|f| object.get(*f))
            .find_map(as_u64)
            .map(|secs| {
                if secs > MILLIS_THRESHOLD {
                    secs / 1000
                } else {
                    secs
                }
            })
            .map(Timestamp::from);

        let network: RelayNetwork = NETWORK_FIELDS
            .iter()
            .filter_map(|f| object.get(*f).and_then(Value::as_str))
            .find_map(RelayNetwork::parse)
            .unwrap_or_else(|| RelayNetwork::from_url(&url));

        Some(Self {
            url,
            rtt,
            last_seen,
            network,
        })
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize a whole ranking response
///
/// Accepts a JSON array, or an object wrapping it in `relays`, `data`, `results` or `items`.
/// Invalid entries are skipped.
pub fn parse_listing(value: &Value) -> Result<Vec<RankedRelay>, Error> {
    let list: &Vec<Value> = match value {
        Value::Array(list) => list,
        Value::Object(object) => LIST_FIELDS
            .iter()
            .find_map(|f| object.get(*f).and_then(Value::as_array))
            .ok_or(Error::UnexpectedResponse)?,
        _ => return Err(Error::UnexpectedResponse),
    };

    Ok(list.iter().filter_map(RankedRelay::from_value).collect())
}

fn compare_rtt(a: Option<Duration>, b: Option<Duration>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(..), None) => Ordering::Less,
        (None, Some(..)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Pick the best `count` clearnet relays
///
/// Lowest RTT first (unknown RTT last), ties broken by the most recent `last_seen`.
pub fn rank_relays(mut candidates: Vec<RankedRelay>, count: usize) -> Vec<RelayUrl> {
    candidates.retain(|c| c.network == RelayNetwork::Clearnet);
    candidates.sort_by(|a, b| {
        compare_rtt(a.rtt, b.rtt).then_with(|| b.last_seen.cmp(&a.last_seen))
    });

    let mut urls: Vec<RelayUrl> = Vec::with_capacity(count);
    for candidate in candidates.into_iter() {
        if urls.len() >= count {
            break;
        }

        if !urls.contains(&candidate.url) {
            urls.push(candidate.url);
        }
    }
    urls
}

/// Remote relay ranking service
pub trait RelayRanking: fmt::Debug + Send + Sync {
    /// Fetch up to `limit` candidates
    fn ranked_relays(&self, limit: usize) -> BoxedFuture<'_, Result<Vec<RankedRelay>, Error>>;
}

/// Ranking service reached over HTTP
///
/// Sends `GET <endpoint>?limit=<n>&offset=0&sort=rtt` and normalizes the JSON response.
#[derive(Debug, Clone)]
pub struct HttpRelayRanking {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRelayRanking {
    /// New ranking client
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

impl RelayRanking for HttpRelayRanking {
    fn ranked_relays(&self, limit: usize) -> BoxedFuture<'_, Result<Vec<RankedRelay>, Error>> {
        Box::pin(async move {
            let limit: String = limit.to_string();

            let value: Value = self
                .client
                .get(self.endpoint.clone())
                .query(&[("limit", limit.as_str()), ("offset", "0"), ("sort", "rtt")])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            parse_listing(&value)
        })
    }
}
