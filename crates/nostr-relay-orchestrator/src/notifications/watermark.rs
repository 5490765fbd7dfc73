// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Seen watermark stores

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nostr::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use super::Error;
use crate::future::BoxedFuture;

/// Durable store of "last seen" timestamps
pub trait WatermarkStore: fmt::Debug + Send + Sync {
    /// Load a watermark
    fn load<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<Timestamp>, Error>>;

    /// Save a watermark
    fn save<'a>(&'a self, key: &'a str, timestamp: Timestamp) -> BoxedFuture<'a, Result<(), Error>>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    watermarks: RwLock<HashMap<String, Timestamp>>,
}

impl MemoryWatermarkStore {
    /// New empty store
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<Timestamp>, Error>> {
        Box::pin(async move {
            let watermarks = self.watermarks.read().await;
            Ok(watermarks.get(key).copied())
        })
    }

    fn save<'a>(&'a self, key: &'a str, timestamp: Timestamp) -> BoxedFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let mut watermarks = self.watermarks.write().await;
            watermarks.insert(key.to_string(), timestamp);
            Ok(())
        })
    }
}

/// Watermarks file content: key to unix seconds
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Watermarks(HashMap<String, u64>);

/// Store backed by a JSON file
///
/// The file holds a map of key to unix seconds. A missing file is an empty store.
/// Writes go to a temporary file renamed over the previous one, so a crash never leaves a
/// truncated file behind.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWatermarkStore {
    /// New store at `path`
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Watermarks, Error> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Watermarks::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut path: OsString = self.path.clone().into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<Timestamp>, Error>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let watermarks: Watermarks = self.read().await?;
            Ok(watermarks.0.get(key).copied().map(Timestamp::from))
        })
    }

    fn save<'a>(&'a self, key: &'a str, timestamp: Timestamp) -> BoxedFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;

            let mut watermarks: Watermarks = match self.read().await {
                Ok(watermarks) => watermarks,
                Err(Error::Json(e)) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Replacing malformed watermarks file.");
                    Watermarks::default()
                }
                Err(e) => return Err(e),
            };
            watermarks.0.insert(key.to_string(), timestamp.as_u64());

            let json: Vec<u8> = serde_json::to_vec(&watermarks)?;

            let tmp: PathBuf = self.tmp_path();
            fs::write(&tmp, json).await?;
            fs::rename(&tmp, &self.path).await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");

        let store = FileWatermarkStore::new(&path);
        assert_eq!(store.load("a").await.unwrap(), None);

        store.save("a", Timestamp::from(100)).await.unwrap();
        store.save("b", Timestamp::from(200)).await.unwrap();

        // Another instance over the same file
        let reloaded = FileWatermarkStore::new(&path);
        assert_eq!(reloaded.load("a").await.unwrap(), Some(Timestamp::from(100)));
        assert_eq!(reloaded.load("b").await.unwrap(), Some(Timestamp::from(200)));
    }

    #[tokio::test]
    async fn test_file_store_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileWatermarkStore::new(&path);
        assert!(matches!(store.load("a").await, Err(Error::Json(..))));

        // Saving replaces the malformed content
        store.save("a", Timestamp::from(100)).await.unwrap();
        assert_eq!(store.load("a").await.unwrap(), Some(Timestamp::from(100)));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
