//! Durable key-value storage trait and implementations.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Durable string-keyed map. Crash-consistent and process-exclusive.
#[async_trait]
pub trait DurableMap: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn contains(&self, key: &str) -> Result<bool>;

    /// Flush any buffered writes. Called once at shutdown before exit.
    async fn flush(&self) -> Result<()>;
}

/// File-backed store: one file per key under a base directory.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-write never leaves a torn value behind.
#[derive(Clone)]
pub struct FileKvStore {
    base_path: PathBuf,
}

impl FileKvStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys contain conversation ids and uuids; anything outside the
        // filename-safe set is mapped to '_'.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl DurableMap for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).await?;
        Ok(Some(contents))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key).exists())
    }

    async fn flush(&self) -> Result<()> {
        // Every set is renamed into place already; nothing is buffered.
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKvStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableMap for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.write().await.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.map.read().await.contains_key(key))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
