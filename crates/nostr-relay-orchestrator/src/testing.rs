// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! In-memory relays for tests
//!
//! [`ScriptedTransport`] implements [`WebSocketTransport`] without sockets: every registered
//! [`ScriptedRelay`] answers `REQ`s from a fixed event set, followed by `EOSE`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_utility::{task, time};
use async_wsocket::{ConnectionMode, Message};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use nostr::prelude::*;
use serde_json::Value;
use tokio::sync::watch;

use crate::future::BoxedFuture;
use crate::transport::{BoxSink, BoxStream, TransportError, WebSocketTransport};
use crate::url::{canonical_str, normalize_relay_url};

const AUTH_CHALLENGE: &str = "scripted-challenge";

/// Behaviour of one in-memory relay
#[derive(Debug, Clone)]
pub(crate) struct ScriptedRelay {
    url: String,
    events: Vec<Event>,
    refuse: bool,
    connect_delay: Option<Duration>,
    require_auth: bool,
    never_eose: bool,
}

impl ScriptedRelay {
    pub(crate) fn new(url: &str) -> Self {
        let url = normalize_relay_url(url).unwrap();
        Self {
            url: canonical_str(&url).to_string(),
            events: Vec::new(),
            refuse: false,
            connect_delay: None,
            require_auth: false,
            never_eose: false,
        }
    }

    pub(crate) fn events<I>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = Event>,
    {
        self.events.extend(events);
        self
    }

    /// Refuse every connection attempt
    pub(crate) fn refuse(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub(crate) fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Send an `AUTH` challenge on connect and refuse `REQ`s until authenticated
    pub(crate) fn require_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    /// Send the stored events but never `EOSE`
    pub(crate) fn never_eose(mut self) -> Self {
        self.never_eose = true;
        self
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    opened: usize,
    open: usize,
    requests: usize,
}

#[derive(Debug)]
struct RelayEntry {
    relay: ScriptedRelay,
    counters: SessionCounters,
    /// Bumped to kill the open sessions
    kill: watch::Sender<u64>,
}

/// In-memory transport
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedTransport {
    relays: Arc<Mutex<HashMap<String, RelayEntry>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, relay: ScriptedRelay) {
        let (kill, ..) = watch::channel(0);
        let mut relays = self.relays.lock().unwrap();
        relays.insert(
            relay.url.clone(),
            RelayEntry {
                relay,
                counters: SessionCounters::default(),
                kill,
            },
        );
    }

    fn with_entry<T>(&self, url: &str, f: impl FnOnce(&mut RelayEntry) -> T) -> Option<T> {
        let url = normalize_relay_url(url).ok()?;
        let mut relays = self.relays.lock().unwrap();
        relays.get_mut(canonical_str(&url)).map(f)
    }

    /// Number of sessions ever opened to `url`
    pub(crate) fn sessions_opened(&self, url: &str) -> usize {
        self.with_entry(url, |e| e.counters.opened).unwrap_or_default()
    }

    /// Number of sessions currently open to `url`
    pub(crate) fn open_sessions(&self, url: &str) -> usize {
        self.with_entry(url, |e| e.counters.open).unwrap_or_default()
    }

    /// Number of `REQ`s received by `url`
    pub(crate) fn requests(&self, url: &str) -> usize {
        self.with_entry(url, |e| e.counters.requests).unwrap_or_default()
    }

    /// Close every open session to `url` from the relay side
    pub(crate) fn drop_sessions(&self, url: &str) {
        self.with_entry(url, |e| e.kill.send_modify(|v| *v += 1));
    }

    fn session_closed(&self, url: &str) {
        self.with_entry(url, |e| e.counters.open = e.counters.open.saturating_sub(1));
    }

    fn request_received(&self, url: &str) {
        self.with_entry(url, |e| e.counters.requests += 1);
    }
}

impl WebSocketTransport for ScriptedTransport {
    fn connect<'a>(
        &'a self,
        url: &'a RelayUrl,
        _mode: &'a ConnectionMode,
        _timeout: Duration,
    ) -> BoxedFuture<'a, Result<(BoxSink, BoxStream), TransportError>> {
        Box::pin(async move {
            let key: String = canonical_str(url).to_string();

            let entry = self.with_entry(&key, |e| (e.relay.clone(), e.kill.subscribe()));
            let (relay, kill) = entry.ok_or_else(TransportError::refused)?;

            if let Some(delay) = relay.connect_delay {
                time::sleep(delay).await;
            }

            if relay.refuse {
                return Err(TransportError::refused());
            }

            self.with_entry(&key, |e| {
                e.counters.opened += 1;
                e.counters.open += 1;
            });

            let (client_tx, client_rx) = mpsc::unbounded::<Message>();
            let (server_tx, server_rx) = mpsc::unbounded::<Result<Message, TransportError>>();

            task::spawn(serve(self.clone(), relay, client_rx, server_tx, kill));

            let sink: BoxSink = Box::new(client_tx.sink_map_err(TransportError::backend));
            let stream: BoxStream = Box::new(server_rx);

            Ok((sink, stream))
        })
    }
}

async fn serve(
    transport: ScriptedTransport,
    relay: ScriptedRelay,
    mut client_rx: mpsc::UnboundedReceiver<Message>,
    server_tx: mpsc::UnboundedSender<Result<Message, TransportError>>,
    mut kill: watch::Receiver<u64>,
) {
    let send = |json: String| {
        let _ = server_tx.unbounded_send(Ok(Message::Text(json)));
    };

    let mut authenticated: bool = false;

    if relay.require_auth {
        send(serde_json::json!(["AUTH", AUTH_CHALLENGE]).to_string());
    }

    loop {
        tokio::select! {
            msg = client_rx.next() => {
                let json = match msg {
                    Some(Message::Text(json)) => json,
                    Some(_) => continue,
                    None => break,
                };

                let value: Value = match serde_json::from_str(&json) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                let Some(array) = value.as_array() else { continue };

                match array.first().and_then(Value::as_str) {
                    Some("REQ") => {
                        transport.request_received(&relay.url);

                        let Some(id) = array.get(1).and_then(Value::as_str) else { continue };
                        let id = SubscriptionId::new(id);

                        if relay.require_auth && !authenticated {
                            send(RelayMessage::closed(id, "auth-required: scripted relay").as_json());
                            continue;
                        }

                        let filters: Vec<Filter> = array[2..]
                            .iter()
                            .filter_map(|f| serde_json::from_value(f.clone()).ok())
                            .collect();

                        for event in matching_events(&relay.events, &filters) {
                            send(RelayMessage::event(id.clone(), event).as_json());
                        }

                        if !relay.never_eose {
                            send(RelayMessage::eose(id).as_json());
                        }
                    }
                    Some("AUTH") => {
                        let event: Option<Event> = array.get(1).and_then(|e| serde_json::from_value(e.clone()).ok());
                        if let Some(event) = event {
                            authenticated = event.kind == Kind::Authentication;
                            send(RelayMessage::ok(event.id, authenticated, "").as_json());
                        }
                    }
                    _ => {}
                }
            }
            _ = kill.changed() => break,
        }
    }

    transport.session_closed(&relay.url);
}

/// Events matching any of the filters, newest first, honoring `limit`
pub(crate) fn matching_events(events: &[Event], filters: &[Filter]) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::new();

    for filter in filters {
        let mut matched: Vec<&Event> = events.iter().filter(|e| matches(filter, e)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        for event in matched {
            if !out.iter().any(|e| e.id == event.id) {
                out.push(event.clone());
            }
        }
    }

    out
}

fn matches(filter: &Filter, event: &Event) -> bool {
    filter.ids.as_ref().is_none_or(|ids| ids.contains(&event.id))
        && filter
            .authors
            .as_ref()
            .is_none_or(|authors| authors.contains(&event.pubkey))
        && filter
            .kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind))
        && filter.since.is_none_or(|since| event.created_at >= since)
        && filter.until.is_none_or(|until| event.created_at <= until)
        && filter.generic_tags.iter().all(|(letter, values)| {
            event.tags.iter().any(|tag| {
                let tag = tag.as_slice();
                tag.len() >= 2 && tag[0] == letter.as_str() && values.contains(&tag[1])
            })
        })
}

/// Kind-1 note with a fixed timestamp
pub(crate) fn text_note(keys: &Keys, content: &str, created_at: u64) -> Event {
    EventBuilder::text_note(content)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}

/// Event of any kind with a fixed timestamp and tags
pub(crate) fn event_with_tags<I>(
    keys: &Keys,
    kind: Kind,
    content: &str,
    created_at: u64,
    tags: I,
) -> Event
where
    I: IntoIterator<Item = Vec<String>>,
{
    let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
    EventBuilder::new(kind, content)
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}

/// Shorthand for building tag vectors
pub(crate) fn tag(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Log to the test output, filtered by `RUST_LOG`
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
