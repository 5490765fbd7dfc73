// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

pub(crate) type BoxedFuture<'a, T> = futures::future::BoxFuture<'a, T>;
