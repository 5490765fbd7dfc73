// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::fmt;

use nostr::message::MessageHandleError;

use crate::transport::TransportError;

/// [`RelayConnection`](super::RelayConnection) error
#[derive(Debug)]
pub enum Error {
    /// Transport error
    Transport(TransportError),
    /// Message handle error
    MessageHandle(MessageHandleError),
    /// Can't sign the auth event
    Signer(String),
    /// No signer installed
    SignerNotConfigured,
    /// Relay not connected
    NotConnected,
    /// Filters empty
    EmptyFilters,
    /// The outgoing message queue is full or closed
    CantSendMessageToDispatcher,
    /// Relay replied with a negative `OK` / error message
    RelayMessage(String),
    /// The notification channel was closed before a response arrived
    PrematureExit,
    /// Generic timeout
    Timeout,
    /// Received message too large
    RelayMessageTooLarge {
        /// Message size
        size: usize,
        /// Max message size
        max_size: usize,
    },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::MessageHandle(e) => e.fmt(f),
            Self::Signer(e) => write!(f, "can't sign auth event: {e}"),
            Self::SignerNotConfigured => f.write_str("signer not configured"),
            Self::NotConnected => f.write_str("relay not connected"),
            Self::EmptyFilters => f.write_str("filters empty"),
            Self::CantSendMessageToDispatcher => {
                f.write_str("can't send message to the relay dispatcher")
            }
            Self::RelayMessage(message) => write!(f, "{message}"),
            Self::PrematureExit => f.write_str("premature exit"),
            Self::Timeout => f.write_str("timeout"),
            Self::RelayMessageTooLarge { size, max_size } => write!(
                f,
                "received message too large: size={size}, max_size={max_size}"
            ),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<MessageHandleError> for Error {
    fn from(e: MessageHandleError) -> Self {
        Self::MessageHandle(e)
    }
}
