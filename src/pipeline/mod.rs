//! Map-reduce summarization pipeline for Oppsum.
//!
//! Stage executors are pure collaborators: they take inputs, call the LLM
//! capability, and return results. Job state lives with the scheduler.

mod map;
mod reduce;
mod validate;

pub use map::{MapResult, MapStage};
pub use reduce::{ReduceStage, ReducedSummary};
pub use validate::{ValidationVerdict, Validator};

use crate::config::Settings;
use serde::{Deserialize, Serialize};

/// A single timestamp-anchored summary bullet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    /// Anchor into the source media, in milliseconds.
    pub timestamp_ms: u64,
    /// Bullet text.
    pub text: String,
    /// Short verbatim quote backing the bullet, when the model provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_quote: Option<String>,
}

/// Per-job pipeline parameters.
///
/// Everything here feeds the cache fingerprint: two submissions with equal
/// parameters and equal transcript content resolve to the same artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Language hint passed to both stages.
    pub language: String,
    /// Token budget per chunk.
    pub token_budget: usize,
    /// Model tier for the map stage.
    pub map_model: String,
    /// Model tier for the reduce stage.
    pub reduce_model: String,
    /// Prompt version; bumping invalidates cached artifacts.
    pub prompt_version: String,
}

impl JobParams {
    /// Defaults derived from settings; callers may override per submission.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            language: settings.pipeline.language.clone(),
            token_budget: settings.chunking.token_budget,
            map_model: settings.map.model.clone(),
            reduce_model: settings.reduce.model.clone(),
            prompt_version: settings.cache.prompt_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_settings() {
        let settings = Settings::default();
        let params = JobParams::from_settings(&settings);
        assert_eq!(params.token_budget, settings.chunking.token_budget);
        assert_eq!(params.map_model, settings.map.model);
        assert_eq!(params.prompt_version, settings.cache.prompt_version);
    }
}
