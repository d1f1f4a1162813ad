// Token storage
// Extension-wide key-value cell holding the current bearer token

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Persistent cell for the current bearer token
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token, if any
    async fn get(&self) -> Result<Option<String>>;

    /// Replace the current token. An empty token clears the cell.
    async fn set(&self, token: &str) -> Result<()>;

    /// Forget the current token
    async fn clear(&self) -> Result<()>;
}

/// In-process token store
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<String>> {
        Ok(self.token.read().await.clone())
    }

    async fn set(&self, token: &str) -> Result<()> {
        let mut current = self.token.write().await;
        *current = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.write().await = None;
        Ok(())
    }
}

/// SQLite-backed token store, one row per storage key
pub struct SqliteTokenStore {
    conn: Arc<Mutex<Connection>>,
    key: String,
}

impl SqliteTokenStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path, key: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create token store directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;

        tracing::debug!("Token store opened at {}", path.display());
        Self::from_connection(conn, key.into())
    }

    /// Throwaway in-memory database
    pub fn open_in_memory(key: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn, key.into())
    }

    fn from_connection(conn: Connection, key: String) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS storage_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create storage_kv table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key,
        })
    }

    /// Run a blocking closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let key = self.key.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("Token store connection lock poisoned"))?;
            f(&conn, &key)
        })
        .await
        .context("Token store task failed")?
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn get(&self) -> Result<Option<String>> {
        self.with_conn(|conn, key| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM storage_kv WHERE key = ?",
                    [key],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to load token from SQLite")?;
            Ok(value.filter(|v| !v.is_empty()))
        })
        .await
    }

    async fn set(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return self.clear().await;
        }

        let token = token.to_string();
        self.with_conn(move |conn, key| {
            conn.execute(
                "INSERT INTO storage_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, token.as_str()],
            )
            .context("Failed to save token to SQLite")?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn, key| {
            conn.execute("DELETE FROM storage_kv WHERE key = ?", [key])
                .context("Failed to clear token in SQLite")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get().await.unwrap(), None);

        store.set("abc123").await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some("abc123".to_string()));

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_empty_token_clears() {
        let store = MemoryTokenStore::with_token("abc123");
        store.set("").await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_overwrites_and_clears() {
        let store = SqliteTokenStore::open_in_memory("savvy_user_key").unwrap();
        assert_eq!(store.get().await.unwrap(), None);

        store.set("first").await.unwrap();
        store.set("second").await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some("second".to_string()));

        store.set("").await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_opens() {
        let dir = std::env::temp_dir().join(format!("savvy-bridge-store-{}", std::process::id()));
        let path = dir.join("tokens.sqlite3");

        {
            let store = SqliteTokenStore::open(&path, "savvy_user_key").unwrap();
            store.set("persisted").await.unwrap();
        }

        let reopened = SqliteTokenStore::open(&path, "savvy_user_key").unwrap();
        assert_eq!(reopened.get().await.unwrap(), Some("persisted".to_string()));

        // Keys are independent cells
        let other = SqliteTokenStore::open(&path, "other_key").unwrap();
        assert_eq!(other.get().await.unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
