//! SQLite-backed artifact cache.
//!
//! Persists cached pipeline artifacts across restarts. Entries carry an
//! expiry timestamp; expired rows are treated as absent and deleted on read.

use super::{ArtifactCache, Fingerprint};
use crate::artifact::ArtifactSet;
use crate::clock::{Clock, SystemClock};
use crate::error::{OppsumError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        fingerprint TEXT PRIMARY KEY,
        artifacts_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
"#;

/// SQLite-backed artifact cache.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    /// Open (or create) a cache database at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized artifact cache at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Create an in-memory cache database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OppsumError::Cache(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl ArtifactCache for SqliteCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<ArtifactSet>>> {
        let conn = self.lock()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT artifacts_json, expires_at FROM cache_entries WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((artifacts_json, expires_raw)) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&expires_raw)
            .map_err(|e| OppsumError::Cache(format!("bad expires_at: {}", e)))?
            .with_timezone(&Utc);

        if expires_at <= self.clock.now() {
            debug!("Cache entry {} expired, dropping", fingerprint);
            conn.execute(
                "DELETE FROM cache_entries WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
            )?;
            return Ok(None);
        }

        let artifacts: ArtifactSet = serde_json::from_str(&artifacts_json)?;
        Ok(Some(Arc::new(artifacts)))
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        artifacts: Arc<ArtifactSet>,
        ttl: Duration,
    ) -> Result<()> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        let artifacts_json = serde_json::to_string(artifacts.as_ref())?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (fingerprint, artifacts_json, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                fingerprint.as_str(),
                artifacts_json,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
            ],
        )?;

        debug!("Cached artifacts under {}", fingerprint);
        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now().to_rfc3339();
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(removed)
    }

    async fn entry_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::clock::test_support::ManualClock;
    use crate::config::Settings;
    use crate::pipeline::JobParams;

    fn artifacts() -> Arc<ArtifactSet> {
        let mut set = ArtifactSet::new();
        set.push(Artifact::from_value("reduced_summary", &"content").unwrap());
        Arc::new(set)
    }

    fn fp(content: &str) -> Fingerprint {
        Fingerprint::compute(content, &JobParams::from_settings(&Settings::default()))
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let cache = SqliteCache::in_memory().unwrap();
        cache
            .put(&fp("a"), artifacts(), Duration::from_secs(60))
            .await
            .unwrap();

        let hit = cache.get(&fp("a")).await.unwrap().unwrap();
        assert_eq!(
            hit.get("reduced_summary").unwrap().content_hash,
            artifacts().get("reduced_summary").unwrap().content_hash
        );
        assert!(cache.get(&fp("miss")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_same_fingerprint() {
        let cache = SqliteCache::in_memory().unwrap();
        cache
            .put(&fp("a"), artifacts(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put(&fp("a"), artifacts(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_dropped() {
        let clock = Arc::new(ManualClock::new());
        let cache = SqliteCache::in_memory_with_clock(clock.clone()).unwrap();

        cache
            .put(&fp("a"), artifacts(), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance_secs(61);

        assert!(cache.get(&fp("a")).await.unwrap().is_none());
        assert_eq!(cache.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new());
        let cache = SqliteCache::in_memory_with_clock(clock.clone()).unwrap();

        cache
            .put(&fp("short"), artifacts(), Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .put(&fp("long"), artifacts(), Duration::from_secs(1000))
            .await
            .unwrap();

        clock.advance_secs(11);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = SqliteCache::new(&path).unwrap();
            cache
                .put(&fp("a"), artifacts(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let reopened = SqliteCache::new(&path).unwrap();
        assert!(reopened.get(&fp("a")).await.unwrap().is_some());
    }
}
