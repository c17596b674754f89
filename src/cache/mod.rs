//! Content-addressed artifact cache for Oppsum.
//!
//! A deterministic fingerprint identifies a pipeline request; identical
//! fingerprints resolve to identical artifacts until TTL expiry. Lookup
//! happens once per job, at admission, and a hit short-circuits the whole
//! pipeline.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use crate::artifact::ArtifactSet;
use crate::error::Result;
use crate::pipeline::JobParams;
use crate::transcript::hex_digest;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic identity of a pipeline request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request.
    ///
    /// Pure: depends only on the transcript content hash and the pipeline
    /// parameters. Bumping `prompt_version` or a model tier changes the
    /// fingerprint, never the stored content.
    pub fn compute(content_hash: &str, params: &JobParams) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            content_hash,
            &params.language,
            &params.token_budget.to_string(),
            &params.map_model,
            &params.reduce_model,
            &params.prompt_version,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        Self(hex_digest(hasher))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for artifact cache backends.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// Look up cached artifacts. Expired entries are treated as absent.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<ArtifactSet>>>;

    /// Store artifacts under a fingerprint with a TTL. Content under one
    /// fingerprint is idempotent; last writer wins.
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        artifacts: Arc<ArtifactSet>,
        ttl: Duration,
    ) -> Result<()>;

    /// Explicitly drop one entry. Returns whether it existed.
    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Drop all expired entries, returning the count removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Number of live entries.
    async fn entry_count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn params() -> JobParams {
        JobParams::from_settings(&Settings::default())
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::compute("hash", &params());
        let b = Fingerprint::compute("hash", &params());
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = Fingerprint::compute("hash-a", &params());
        let b = Fingerprint::compute("hash-b", &params());
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_prompt_version() {
        let a = Fingerprint::compute("hash", &params());
        let mut bumped = params();
        bumped.prompt_version = "v2".to_string();
        let b = Fingerprint::compute("hash", &bumped);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_model_tier() {
        let a = Fingerprint::compute("hash", &params());
        let mut other = params();
        other.reduce_model = "some-other-model".to_string();
        let b = Fingerprint::compute("hash", &other);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        // Field separator prevents "ab"+"c" colliding with "a"+"bc".
        let mut p1 = params();
        p1.language = "ab".to_string();
        p1.map_model = "c".to_string();
        let mut p2 = params();
        p2.language = "a".to_string();
        p2.map_model = "bc".to_string();
        assert_ne!(
            Fingerprint::compute("hash", &p1),
            Fingerprint::compute("hash", &p2)
        );
    }
}
