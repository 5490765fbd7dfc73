// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP-66 relay discovery
//!
//! <https://github.com/nostr-protocol/nips/blob/master/66.md>

use std::time::Duration;

use async_utility::time;
use futures::future;
use nostr::prelude::*;
use tokio::sync::Mutex;

use super::ranking::RankedRelay;
use crate::relay::{RelayConnection, Subscription, SubscriptionActivity};
use crate::url::{normalize_relay_url, RelayNetwork};

/// Relay discovery event kind
pub const RELAY_DISCOVERY_KIND: u16 = 30166;

#[inline]
fn relay_discovery() -> Kind {
    Kind::from(RELAY_DISCOVERY_KIND)
}

/// Extract a ranking candidate from a relay discovery event
///
/// `d` is the relay URL, `rtt-open` (or `rtt-read`) the round-trip time in milliseconds and `n`
/// the network. The event timestamp is used as last seen.
pub fn parse_relay_discovery(event: &Event) -> Option<RankedRelay> {
    if event.kind.as_u16() != RELAY_DISCOVERY_KIND {
        return None;
    }

    let mut url: Option<RelayUrl> = None;
    let mut rtt_open: Option<Duration> = None;
    let mut rtt_read: Option<Duration> = None;
    let mut network: Option<RelayNetwork> = None;

    for tag in event.tags.iter() {
        let tag: &[String] = tag.as_slice();
        let (Some(name), Some(value)) = (tag.first(), tag.get(1)) else {
            continue;
        };

        match name.as_str() {
            "d" => url = normalize_relay_url(value).ok(),
            "rtt-open" => rtt_open = parse_millis(value),
            "rtt-read" => rtt_read = parse_millis(value),
            "n" => network = RelayNetwork::parse(value),
            _ => {}
        }
    }

    let url: RelayUrl = url?;
    let network: RelayNetwork = network.unwrap_or_else(|| RelayNetwork::from_url(&url));

    Some(RankedRelay {
        url,
        rtt: rtt_open.or(rtt_read),
        last_seen: Some(event.created_at),
        network,
    })
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Collect relay discovery events from the monitors
///
/// Resolves when every monitor sent `EOSE` (or failed), or after `window`. Every monitor is
/// disconnected before returning.
pub(crate) async fn collect(
    monitors: Vec<RelayConnection>,
    window: Duration,
    limit: usize,
) -> Vec<RankedRelay> {
    let collector: Mutex<Vec<RankedRelay>> = Mutex::new(Vec::new());
    let filter: Filter = Filter::new().kind(relay_discovery()).limit(limit);

    let queries = monitors.iter().map(|monitor| {
        let collector = &collector;
        let filter = filter.clone();
        async move {
            monitor.connect().await;

            if !monitor.is_connected() {
                tracing::debug!(url = %monitor.url(), "Monitor unreachable.");
                return;
            }

            let mut sub: Subscription = match monitor.subscribe(vec![filter]) {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::debug!(url = %monitor.url(), error = %e, "Can't query monitor.");
                    return;
                }
            };

            while let Some(activity) = sub.recv().await {
                match activity {
                    SubscriptionActivity::Event(event) => {
                        if let Some(candidate) = parse_relay_discovery(&event) {
                            collector.lock().await.push(candidate);
                        }
                    }
                    SubscriptionActivity::EndOfStoredEvents => break,
                    SubscriptionActivity::Closed(reason) => {
                        tracing::debug!(url = %monitor.url(), reason = %reason, "Monitor closed the query.");
                        break;
                    }
                }
            }
        }
    });

    if time::timeout(Some(window), future::join_all(queries))
        .await
        .is_none()
    {
        tracing::debug!("NIP-66 collection window elapsed.");
    }

    for monitor in monitors.iter() {
        monitor.disconnect();
    }

    collector.into_inner()
}
