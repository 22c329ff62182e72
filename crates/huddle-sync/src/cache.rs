use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use huddle_types::models::{Message, sort_newest_first};

use crate::error::CacheError;

/// The single cache entry holding the whole serialized message list.
pub const MESSAGES_CACHE_KEY: &str = "messages";

/// Durable device-local key-value storage used for offline viewing.
pub trait LocalCache: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<(), CacheError>> + Send;
}

pub fn encode_snapshot(messages: &[Message]) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(messages)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Message>, CacheError> {
    let mut messages: Vec<Message> = serde_json::from_slice(bytes)?;
    sort_newest_first(&mut messages);
    Ok(messages)
}

/// Read the cached snapshot. Absent, unreadable or malformed entries all
/// come back as an empty list.
pub async fn load_snapshot<C: LocalCache>(cache: &C, key: &str) -> Vec<Message> {
    match cache.get(key).await {
        Ok(Some(bytes)) => match decode_snapshot(&bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Discarding malformed cache entry '{}': {}", key, e);
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Cache read of '{}' failed: {}", key, e);
            Vec::new()
        }
    }
}

/// Persist a snapshot. Failures are logged and swallowed.
pub async fn store_snapshot<C: LocalCache>(cache: &C, key: &str, messages: &[Message]) {
    let bytes = match encode_snapshot(messages) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Snapshot encoding failed: {}", e);
            return;
        }
    };
    if let Err(e) = cache.set(key, bytes).await {
        warn!("Cache write of '{}' failed: {}", key, e);
    }
}

/// Process-local cache. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// SQLite-backed cache that survives restarts. One row per key.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_cache (
                key     TEXT PRIMARY KEY,
                value   BLOB NOT NULL
            );",
        )?;

        info!("Local cache opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl LocalCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| CacheError::Poisoned)?;
            let value = conn
                .query_row("SELECT value FROM kv_cache WHERE key = ?1", [&key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
        .await?
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| CacheError::Poisoned)?;
            conn.execute(
                "INSERT INTO kv_cache (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: Some(id.into()),
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some(format!("text {}", id)),
            image: None,
            location: None,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_entry_loads_as_empty() {
        let cache = MemoryCache::new();
        assert!(load_snapshot(&cache, MESSAGES_CACHE_KEY).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_entry_loads_as_empty() {
        let cache = MemoryCache::new();
        cache.set(MESSAGES_CACHE_KEY, b"{not json".to_vec()).await.unwrap();
        assert!(load_snapshot(&cache, MESSAGES_CACHE_KEY).await.is_empty());

        cache.set(MESSAGES_CACHE_KEY, br#"{"id":"1"}"#.to_vec()).await.unwrap();
        assert!(load_snapshot(&cache, MESSAGES_CACHE_KEY).await.is_empty());
    }

    #[tokio::test]
    async fn stored_snapshot_keeps_its_order() {
        let cache = MemoryCache::new();
        let snapshot = vec![msg("2", 20), msg("1", 10)];
        store_snapshot(&cache, MESSAGES_CACHE_KEY, &snapshot).await;
        assert_eq!(load_snapshot(&cache, MESSAGES_CACHE_KEY).await, snapshot);
    }

    #[tokio::test]
    async fn sqlite_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let snapshot = vec![msg("3", 30), msg("2", 20), msg("1", 10)];

        {
            let cache = SqliteCache::open(&path).unwrap();
            store_snapshot(&cache, MESSAGES_CACHE_KEY, &[msg("0", 0)]).await;
            store_snapshot(&cache, MESSAGES_CACHE_KEY, &snapshot).await;
        }

        let reopened = SqliteCache::open(&path).unwrap();
        assert_eq!(load_snapshot(&reopened, MESSAGES_CACHE_KEY).await, snapshot);
        assert!(reopened.get("other").await.unwrap().is_none());
    }
}
