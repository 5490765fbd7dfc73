// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay discovery, connection pooling and subscription orchestration for nostr clients.
//!
//! The crate decides which relays to talk to ([`discovery`]), keeps live sessions with them
//! ([`relay`], [`pool`]), answers ad-hoc queries across many relays ([`crawler`]),
//! drives the multi-phase startup of a user session ([`bootstrap`]) and turns the
//! "events that reference me" stream into typed notifications ([`notifications`]).
//!
//! Every fan-out resolves when all sources answered **or** a timeout elapsed:
//! partial results are always acceptable and nothing is retried automatically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![warn(clippy::large_futures)]

pub mod bootstrap;
pub mod cache;
pub mod crawler;
pub mod dedup;
pub mod discovery;
mod future;
pub mod merge;
pub mod notifications;
pub mod pool;
pub mod prelude;
pub mod relay;
pub mod session;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod url;

pub use self::bootstrap::{BootstrapOrchestrator, BootstrapPhase, BootstrapState};
pub use self::crawler::{CrawlRequest, RelayCrawler};
pub use self::discovery::{IndexerDiscovery, IndexerSource, IndexerState};
pub use self::notifications::{Notification, NotificationClassifier, NotificationKind};
pub use self::pool::{ConnectionPool, RelayGroup};
pub use self::relay::{ConnectionState, RelayConnection, Subscription, SubscriptionActivity};
pub use self::session::{Session, SessionBuilder};
