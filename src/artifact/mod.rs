//! Stage artifacts for Oppsum.
//!
//! Each pipeline stage produces an immutable, named, content-hashed artifact.
//! Jobs and the cache share one `Arc<ArtifactSet>`; payloads are never copied
//! across stage boundaries.

use crate::error::Result;
use crate::transcript::hex_digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Well-known artifact names, in pipeline order.
pub const TRANSCRIPT: &str = "transcript";
pub const CHUNKS: &str = "chunks";
pub const MAP_PARTIALS: &str = "map_partials";
pub const REDUCED_SUMMARY: &str = "reduced_summary";

/// An immutable named output of a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Stage-assigned name, e.g. `reduced_summary`.
    pub name: String,
    /// Sha256 hex digest of the canonical JSON payload.
    pub content_hash: String,
    /// The payload itself.
    pub data: Value,
}

impl Artifact {
    /// Build an artifact from any serializable payload.
    pub fn from_value<T: Serialize>(name: &str, payload: &T) -> Result<Self> {
        let data = serde_json::to_value(payload)?;
        let content_hash = hash_value(&data);
        Ok(Self {
            name: name.to_string(),
            content_hash,
            data,
        })
    }

    /// Deserialize the payload back into a typed value.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Ordered collection of a job's artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an artifact. Names are unique within a set; pushing a
    /// duplicate name replaces the earlier artifact.
    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.retain(|a| a.name != artifact.name);
        self.artifacts.push(artifact);
    }

    /// Look up an artifact by name.
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Sha256 over the serialized JSON value.
///
/// serde_json preserves map insertion order, and all payloads are built from
/// `#[derive(Serialize)]` structs with a fixed field order, so the digest is
/// deterministic for a given payload.
fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex_digest(hasher)
}
