// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Notifications
//!
//! Turns the stream of events tagging the user into typed [`Notification`]s, deduplicated by
//! event ID, with an unseen count derived from a persisted "last seen" watermark.
//!
//! Loading runs in two stages: a bounded historical fetch that ends at `EOSE` (or timeout),
//! then a live subscription that stays open until [`NotificationClassifier::stop`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_utility::{task, time};
use futures::future::{AbortHandle, Abortable};
use nostr::prelude::*;
use tokio::sync::{watch, Mutex as AsyncMutex};

mod classify;
mod error;
mod watermark;

pub use self::classify::{classify, Notification, NotificationKind};
pub use self::error::Error;
pub use self::watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
use crate::dedup::{DedupSet, DEFAULT_DEDUP_CAPACITY};
use crate::pool::{ConnectionPool, PoolActivity, PoolSubscription};

/// Default storage key of the watermark
pub const DEFAULT_STORAGE_KEY: &str = "notifications:last-seen";

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// [`NotificationClassifier`] options
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    history_limit: usize,
    history_timeout: Duration,
    storage_key: String,
    dedup_capacity: usize,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl NotificationOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Max events of the historical fetch (default: 100)
    #[inline]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Max wait for the historical `EOSE` (default: 10 secs)
    #[inline]
    pub fn history_timeout(mut self, timeout: Duration) -> Self {
        self.history_timeout = timeout;
        self
    }

    /// Watermark storage key (default: `notifications:last-seen`)
    #[inline]
    pub fn storage_key<S>(mut self, key: S) -> Self
    where
        S: Into<String>,
    {
        self.storage_key = key.into();
        self
    }

    /// Capacity of the event ID dedup set (default: 20000)
    #[inline]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }
}

/// Notifications snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationState {
    /// Notifications, newest first
    pub notifications: Vec<Notification>,
    /// Notifications newer than the watermark
    pub unseen: usize,
    /// Watermark
    pub last_seen: Option<Timestamp>,
    /// Historical fetch in progress
    pub loading: bool,
}

impl NotificationState {
    fn recount(&mut self) {
        let last_seen = self.last_seen;
        self.unseen = self
            .notifications
            .iter()
            .filter(|n| is_unseen(n.created_at(), last_seen))
            .count();
    }
}

#[inline]
fn is_unseen(created_at: Timestamp, last_seen: Option<Timestamp>) -> bool {
    match last_seen {
        Some(last_seen) => created_at > last_seen,
        None => true,
    }
}

#[derive(Debug)]
struct LiveSubscription {
    id: SubscriptionId,
    handle: AbortHandle,
}

#[derive(Debug)]
struct InnerNotificationClassifier {
    pool: ConnectionPool,
    public_key: PublicKey,
    store: Arc<dyn WatermarkStore>,
    opts: NotificationOptions,
    state: watch::Sender<NotificationState>,
    seen: Mutex<DedupSet>,
    live: AsyncMutex<Option<LiveSubscription>>,
}

impl Drop for InnerNotificationClassifier {
    fn drop(&mut self) {
        if let Some(live) = self.live.get_mut().take() {
            live.handle.abort();
        }
    }
}

/// Notification classifier of one user
///
/// Cheap to clone: clones share the same state.
#[derive(Debug, Clone)]
pub struct NotificationClassifier {
    inner: Arc<InnerNotificationClassifier>,
}

impl NotificationClassifier {
    /// New classifier
    ///
    /// Subscriptions go to the relays connected in `pool` when [`Self::start`] is called.
    pub fn new(
        pool: ConnectionPool,
        public_key: PublicKey,
        store: Arc<dyn WatermarkStore>,
        opts: NotificationOptions,
    ) -> Self {
        let (state, ..) = watch::channel(NotificationState::default());
        let seen = DedupSet::new(opts.dedup_capacity);
        Self {
            inner: Arc::new(InnerNotificationClassifier {
                pool,
                public_key,
                store,
                opts,
                state,
                seen: Mutex::new(seen),
                live: AsyncMutex::new(None),
            }),
        }
    }

    /// Public key of the user
    #[inline]
    pub fn public_key(&self) -> &PublicKey {
        &self.inner.public_key
    }

    /// Snapshot of the current state
    #[inline]
    pub fn state(&self) -> NotificationState {
        self.inner.state.borrow().clone()
    }

    /// Watch the state
    #[inline]
    pub fn subscribe_state(&self) -> watch::Receiver<NotificationState> {
        self.inner.state.subscribe()
    }

    /// Number of notifications newer than the watermark
    #[inline]
    pub fn unseen_count(&self) -> usize {
        self.inner.state.borrow().unseen
    }

    /// Check if the live subscription is running
    pub async fn is_live(&self) -> bool {
        self.inner.live.lock().await.is_some()
    }

    /// Load the watermark, fetch the history and open the live subscription
    ///
    /// Returns once the historical stage ended. No-op if already started.
    /// An unreadable watermark counts as none.
    pub async fn start(&self) -> Result<(), Error> {
        let mut live = self.inner.live.lock().await;

        if live.is_some() {
            return Ok(());
        }

        let last_seen: Option<Timestamp> =
            match self.inner.store.load(&self.inner.opts.storage_key).await {
                Ok(last_seen) => last_seen,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Can't load notifications watermark, everything is unseen."
                    );
                    None
                }
            };
        self.inner.state.send_modify(|state| {
            state.last_seen = last_seen;
            state.loading = true;
            state.recount();
        });

        // Live stage starts where the history started: overlaps are deduplicated
        let since: Timestamp = Timestamp::now();

        let history = self.inner.history().await;

        self.inner.state.send_modify(|state| state.loading = false);

        history?;

        let filter: Filter = Filter::new().pubkey(self.inner.public_key).since(since);
        let sub: PoolSubscription = self.inner.pool.subscribe(vec![filter]).await?;
        let id: SubscriptionId = sub.id().clone();

        let (handle, registration) = AbortHandle::new_pair();
        let inner: Weak<InnerNotificationClassifier> = Arc::downgrade(&self.inner);
        task::spawn(Abortable::new(listen(inner, sub), registration));

        tracing::debug!(id = %id, public_key = %self.inner.public_key, "Notifications live.");

        *live = Some(LiveSubscription { id, handle });

        Ok(())
    }

    /// Close the live subscription
    pub async fn stop(&self) {
        let mut live = self.inner.live.lock().await;
        if let Some(live) = live.take() {
            live.handle.abort();
            self.inner.pool.unsubscribe(&live.id).await;
            tracing::debug!(id = %live.id, "Notifications stopped.");
        }
    }

    /// Classify and record an event obtained elsewhere
    ///
    /// Returns `true` if a new notification was recorded. Events not tagging the user,
    /// authored by the user or already seen are ignored.
    #[inline]
    pub fn ingest(&self, event: &Event) -> bool {
        self.inner.ingest(event)
    }

    /// Set the watermark to now and persist it
    pub async fn mark_all_seen(&self) -> Result<(), Error> {
        let now: Timestamp = Timestamp::now();

        self.inner
            .store
            .save(&self.inner.opts.storage_key, now)
            .await?;

        self.inner.state.send_modify(|state| {
            state.last_seen = Some(now);
            state.unseen = 0;
        });

        Ok(())
    }
}

impl InnerNotificationClassifier {
    async fn history(&self) -> Result<(), Error> {
        let filter: Filter = Filter::new()
            .pubkey(self.public_key)
            .limit(self.opts.history_limit);
        let mut sub: PoolSubscription = self.pool.subscribe(vec![filter]).await?;

        let collect = async {
            while let Some(activity) = sub.recv().await {
                match activity {
                    PoolActivity::Event { event, .. } => {
                        self.ingest(&event);
                    }
                    PoolActivity::EndOfStoredEvents => break,
                }
            }
        };

        if time::timeout(Some(self.opts.history_timeout), collect)
            .await
            .is_none()
        {
            tracing::debug!("Timeout while loading notification history.");
        }

        self.pool.unsubscribe(sub.id()).await;

        Ok(())
    }

    fn ingest(&self, event: &Event) -> bool {
        if !tags_user(event, &self.public_key) {
            return false;
        }

        let Some(notification) = classify(event, &self.public_key) else {
            return false;
        };

        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(notification.id) {
                return false;
            }
        }

        self.state.send_if_modified(|state| {
            // Also covers IDs evicted from the dedup set
            if state.notifications.iter().any(|n| n.id == notification.id) {
                return false;
            }

            if is_unseen(notification.created_at(), state.last_seen) {
                state.unseen += 1;
            }

            let pos: usize = state
                .notifications
                .partition_point(|n| n.created_at() >= notification.created_at());
            state.notifications.insert(pos, notification);

            true
        })
    }
}

async fn listen(inner: Weak<InnerNotificationClassifier>, mut sub: PoolSubscription) {
    while let Some(activity) = sub.recv().await {
        if let PoolActivity::Event { event, .. } = activity {
            let Some(inner) = inner.upgrade() else {
                break;
            };

            if inner.ingest(&event) {
                tracing::trace!(id = %event.id, "New notification.");
            }
        }
    }
}

fn tags_user(event: &Event, public_key: &PublicKey) -> bool {
    event.tags.iter().any(|tag| match tag.as_slice() {
        [name, value, ..] => name == "p" && PublicKey::from_hex(value).is_ok_and(|pk| &pk == public_key),
        _ => false,
    })
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} notifications ({} unseen)",
            self.notifications.len(),
            self.unseen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolOptions, RelayGroup};
    use crate::testing::{event_with_tags, tag, ScriptedRelay, ScriptedTransport};

    fn classifier(pool: ConnectionPool, public_key: PublicKey) -> NotificationClassifier {
        NotificationClassifier::new(
            pool,
            public_key,
            Arc::new(MemoryWatermarkStore::new()),
            NotificationOptions::default(),
        )
    }

    fn mention(from: &Keys, to: &PublicKey, created_at: u64) -> Event {
        event_with_tags(
            from,
            Kind::TextNote,
            "gm",
            created_at,
            [tag(&["p", &to.to_hex()])],
        )
    }

    #[tokio::test]
    async fn test_ingest_dedup_and_order() {
        let me = Keys::generate();
        let them = Keys::generate();
        let notifications = classifier(ConnectionPool::new(), me.public_key());

        let old = mention(&them, &me.public_key(), 10);
        let new = mention(&them, &me.public_key(), 20);

        assert!(notifications.ingest(&old));
        assert!(notifications.ingest(&new));
        assert!(!notifications.ingest(&old));

        let state = notifications.state();
        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.notifications[0].id, new.id);
        assert_eq!(state.unseen, 2);

        // Not tagging me
        let other = mention(&them, &them.public_key(), 30);
        assert!(!notifications.ingest(&other));

        // Authored by me
        let mine = mention(&me, &me.public_key(), 30);
        assert!(!notifications.ingest(&mine));
    }

    #[tokio::test]
    async fn test_mark_all_seen_survives_reload() {
        let me = Keys::generate();
        let them = Keys::generate();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");

        let store: Arc<dyn WatermarkStore> = Arc::new(FileWatermarkStore::new(&path));
        let notifications = NotificationClassifier::new(
            ConnectionPool::new(),
            me.public_key(),
            store,
            NotificationOptions::default(),
        );

        let seen_at = Timestamp::now().as_u64() - 60;
        let event = mention(&them, &me.public_key(), seen_at);
        notifications.ingest(&event);
        assert_eq!(notifications.unseen_count(), 1);

        notifications.mark_all_seen().await.unwrap();
        assert_eq!(notifications.unseen_count(), 0);

        // Simulated reload
        let store: Arc<dyn WatermarkStore> = Arc::new(FileWatermarkStore::new(&path));
        let reloaded = NotificationClassifier::new(
            ConnectionPool::new(),
            me.public_key(),
            store,
            NotificationOptions::default(),
        );
        reloaded.start().await.unwrap();

        assert!(reloaded.ingest(&event));
        assert_eq!(reloaded.unseen_count(), 0);

        let later = mention(&them, &me.public_key(), Timestamp::now().as_u64() + 60);
        assert!(reloaded.ingest(&later));
        assert_eq!(reloaded.unseen_count(), 1);
    }

    #[tokio::test]
    async fn test_start_over_malformed_watermark_file() {
        let me = Keys::generate();
        let them = Keys::generate();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");
        std::fs::write(&path, b"{\"notifications:last-seen\": ").unwrap();

        let store: Arc<dyn WatermarkStore> = Arc::new(FileWatermarkStore::new(&path));
        let notifications = NotificationClassifier::new(
            ConnectionPool::new(),
            me.public_key(),
            store,
            NotificationOptions::default(),
        );

        notifications.start().await.unwrap();
        assert!(notifications.is_live().await);
        assert_eq!(notifications.state().last_seen, None);

        assert!(notifications.ingest(&mention(&them, &me.public_key(), 10)));
        assert_eq!(notifications.unseen_count(), 1);

        // The watermark can be persisted again
        notifications.mark_all_seen().await.unwrap();
        assert_eq!(notifications.unseen_count(), 0);

        let reloaded = FileWatermarkStore::new(&path);
        assert!(reloaded
            .load(DEFAULT_STORAGE_KEY)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let me = Keys::generate();
        let them = Keys::generate();

        let reaction = event_with_tags(
            &them,
            Kind::Reaction,
            "+",
            10,
            [tag(&["p", &me.public_key().to_hex()])],
        );
        let reply = event_with_tags(
            &them,
            Kind::TextNote,
            "hi",
            20,
            [
                tag(&["e", &EventId::from_slice(&[0; 32]).unwrap().to_hex(), "", "reply"]),
                tag(&["p", &me.public_key().to_hex()]),
            ],
        );
        let unrelated = mention(&them, &them.public_key(), 30);

        let transport = ScriptedTransport::new();
        transport.add(
            ScriptedRelay::new("wss://inbox.example.com")
                .events([reaction.clone(), reply.clone(), unrelated]),
        );

        let pool = ConnectionPool::with_transport(transport.clone(), PoolOptions::default());
        pool.add_relay("wss://inbox.example.com", RelayGroup::Inbox)
            .await
            .unwrap();
        pool.connect_all().await;

        let notifications = classifier(pool, me.public_key());
        let watcher = notifications.subscribe_state();

        notifications.start().await.unwrap();

        let state = notifications.state();
        assert!(!state.loading);
        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.notifications[0].kind, NotificationKind::Reply);
        assert_eq!(state.notifications[1].kind, NotificationKind::Reaction);
        assert_eq!(state.unseen, 2);
        assert!(watcher.has_changed().unwrap());

        assert!(notifications.is_live().await);

        // History and live requests
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.requests("wss://inbox.example.com"), 2);

        // Idempotent
        notifications.start().await.unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.requests("wss://inbox.example.com"), 2);

        notifications.stop().await;
        assert!(!notifications.is_live().await);
    }

    #[tokio::test]
    async fn test_history_timeout() {
        let me = Keys::generate();
        let them = Keys::generate();

        let transport = ScriptedTransport::new();
        transport.add(
            ScriptedRelay::new("wss://slow.example.com")
                .events([mention(&them, &me.public_key(), 10)])
                .never_eose(),
        );

        let pool = ConnectionPool::with_transport(transport, PoolOptions::default());
        pool.add_relay("wss://slow.example.com", RelayGroup::Inbox)
            .await
            .unwrap();
        pool.connect_all().await;

        let notifications = NotificationClassifier::new(
            pool,
            me.public_key(),
            Arc::new(MemoryWatermarkStore::new()),
            NotificationOptions::new().history_timeout(Duration::from_millis(200)),
        );

        let started = std::time::Instant::now();
        notifications.start().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(notifications.state().notifications.len(), 1);
    }
}
