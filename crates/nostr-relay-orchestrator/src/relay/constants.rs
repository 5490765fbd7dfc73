// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay constants

use core::time::Duration;

pub(super) const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub(super) const DEFAULT_NOTIFICATION_CHANNEL_SIZE: usize = 2048;
pub(super) const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 1024;
pub(super) const WAIT_FOR_OK_TIMEOUT: Duration = Duration::from_secs(10);
pub(super) const WEBSOCKET_TX_TIMEOUT: Duration = Duration::from_secs(10);

/// Max relay message size
pub const MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024; // 5 MB
