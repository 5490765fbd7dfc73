// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

// External crates
pub use nostr::prelude::*;

// Internal modules
pub use crate::bootstrap::*;
pub use crate::cache::*;
pub use crate::crawler::*;
pub use crate::discovery::*;
pub use crate::notifications::*;
pub use crate::pool::*;
pub use crate::relay::*;
pub use crate::session::*;
pub use crate::*;
