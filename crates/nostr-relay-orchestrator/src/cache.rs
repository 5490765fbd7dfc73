// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Read-through / write-through event cache
//!
//! Bootstrap reads profile, relay list and contacts from the cache before asking the network,
//! and writes every adopted event back. The cache is optional: every failure is logged and
//! treated as a miss.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nostr::prelude::*;
use nostr_database::{DatabaseError, Events, NostrDatabase};
use tokio::sync::RwLock;

use crate::future::BoxedFuture;
use crate::merge;

/// Cache error
#[derive(Debug)]
pub enum CacheError {
    /// Backend error
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for CacheError {}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => e.fmt(f),
        }
    }
}

impl CacheError {
    /// Create a new backend error
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(error.into())
    }
}

impl From<DatabaseError> for CacheError {
    fn from(e: DatabaseError) -> Self {
        Self::backend(e)
    }
}

/// Event cache
pub trait EventCache: fmt::Debug + Send + Sync {
    /// Store an event
    fn cache_event<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), CacheError>>;

    /// Newest cached event of `kind` authored by `public_key`
    fn replaceable(
        &self,
        public_key: PublicKey,
        kind: Kind,
    ) -> BoxedFuture<'_, Result<Option<Event>, CacheError>>;

    /// Cached profile (kind 0)
    fn profile(&self, public_key: PublicKey) -> BoxedFuture<'_, Result<Option<Event>, CacheError>> {
        self.replaceable(public_key, Kind::Metadata)
    }

    /// Cached relay list (kind 10002)
    fn relay_list(
        &self,
        public_key: PublicKey,
    ) -> BoxedFuture<'_, Result<Option<Event>, CacheError>> {
        self.replaceable(public_key, Kind::RelayList)
    }

    /// Cached contact list (kind 3)
    fn contacts(
        &self,
        public_key: PublicKey,
    ) -> BoxedFuture<'_, Result<Option<Event>, CacheError>> {
        self.replaceable(public_key, Kind::ContactList)
    }
}

/// In-memory cache
///
/// Keeps only the newest event per author and kind.
#[derive(Debug, Default)]
pub struct MemoryEventCache {
    events: RwLock<HashMap<(PublicKey, Kind), Event>>,
}

impl MemoryEventCache {
    /// New empty cache
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached events
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl EventCache for MemoryEventCache {
    fn cache_event<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut events = self.events.write().await;

            let key = (event.pubkey, event.kind);
            let replace: bool = match events.get(&key) {
                Some(current) => merge::is_newer(event, current),
                None => true,
            };

            if replace {
                events.insert(key, event.clone());
            }

            Ok(())
        })
    }

    fn replaceable(
        &self,
        public_key: PublicKey,
        kind: Kind,
    ) -> BoxedFuture<'_, Result<Option<Event>, CacheError>> {
        Box::pin(async move {
            let events = self.events.read().await;
            Ok(events.get(&(public_key, kind)).cloned())
        })
    }
}

/// Cache backed by a [`NostrDatabase`]
#[derive(Debug, Clone)]
pub struct DatabaseEventCache {
    database: Arc<dyn NostrDatabase>,
}

impl DatabaseEventCache {
    /// New cache over a database
    #[inline]
    pub fn new(database: Arc<dyn NostrDatabase>) -> Self {
        Self { database }
    }
}

impl EventCache for DatabaseEventCache {
    fn cache_event<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let status = self.database.save_event(event).await?;
            tracing::trace!(id = %event.id, status = ?status, "Event cached.");
            Ok(())
        })
    }

    fn replaceable(
        &self,
        public_key: PublicKey,
        kind: Kind,
    ) -> BoxedFuture<'_, Result<Option<Event>, CacheError>> {
        Box::pin(async move {
            let filter: Filter = Filter::new().author(public_key).kind(kind).limit(1);
            let events: Events = self.database.query(filter).await?;
            Ok(events.first_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::event_with_tags;

    #[tokio::test]
    async fn test_memory_cache_keeps_newest() {
        let keys = Keys::generate();
        let old = event_with_tags(&keys, Kind::Metadata, "{}", 100, []);
        let new = event_with_tags(&keys, Kind::Metadata, "{}", 200, []);

        let cache = MemoryEventCache::new();
        cache.cache_event(&new).await.unwrap();
        cache.cache_event(&old).await.unwrap();

        let profile = cache.profile(keys.public_key()).await.unwrap().unwrap();
        assert_eq!(profile.created_at, Timestamp::from(200));

        assert!(cache.relay_list(keys.public_key()).await.unwrap().is_none());
        assert_eq!(cache.len().await, 1);
    }
}
