//! LLM capability abstraction for Oppsum.
//!
//! The pipeline only sees [`LlmClient`]: one structured-generation call that
//! either returns raw model text or fails with a taxonomy error. Retry and
//! backoff policy belongs to the caller, not the client.

mod openai;

pub use openai::{create_client, create_client_with_timeout, OpenAiClient};

use crate::config::LlmSettings;
use crate::error::{OppsumError, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::warn;

/// A single structured-generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Text-generation capability behind the pipeline.
///
/// Implementations fail with `RateLimit` or `LlmTimeout` for transient
/// conditions; callers decide whether and how to retry.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<String>;
}

/// Retry policy for transient LLM failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (first try included).
    pub max_attempts: u32,
    /// Base delay, doubled per attempt.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
        }
    }

    /// Exponential backoff with jitter: `base * 2^attempt` plus up to 50%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << attempt.min(6));
        let half_ms = (exp.as_millis() as u64) / 2;

        let mut hasher = DefaultHasher::new();
        attempt.hash(&mut hasher);
        std::process::id().hash(&mut hasher);
        let jitter_ms = hasher.finish() % (half_ms + 1);

        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` with retries on transient errors (`RateLimit`, `LlmTimeout`).
///
/// Terminal errors and exhausted budgets surface the last error unchanged so
/// the job fails with the original taxonomy code.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "LLM call failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Extract the JSON object payload from a model response.
///
/// Models occasionally wrap JSON in prose or markdown fences; take the
/// outermost braces.
pub fn extract_json_object(response: &str) -> Result<&str> {
    let start = response.find('{');
    let end = response.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&response[s..=e]),
        _ => Err(OppsumError::LlmValidation(format!(
            "response contains no JSON object: {}",
            &response[..response.len().min(200)]
        ))),
    }
}
