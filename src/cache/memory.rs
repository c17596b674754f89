//! In-memory artifact cache.
//!
//! Process-local; entries are lost on restart. Useful for tests and
//! single-shot CLI runs.

use super::{ArtifactCache, Fingerprint};
use crate::artifact::ArtifactSet;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct StoredEntry {
    artifacts: Arc<ArtifactSet>,
    expires_at: DateTime<Utc>,
}

/// In-memory artifact cache.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactCache for MemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<ArtifactSet>>> {
        let mut entries = self.entries.write().await;
        match entries.get(fingerprint.as_str()) {
            Some(entry) if entry.expires_at > self.clock.now() => {
                Ok(Some(entry.artifacts.clone()))
            }
            Some(_) => {
                // Expired: drop lazily.
                entries.remove(fingerprint.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        artifacts: Arc<ArtifactSet>,
        ttl: Duration,
    ) -> Result<()> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut entries = self.entries.write().await;
        entries.insert(
            fingerprint.as_str().to_string(),
            StoredEntry {
                artifacts,
                expires_at,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(fingerprint.as_str()).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }

    async fn entry_count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
