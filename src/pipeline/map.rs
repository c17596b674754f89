//! Map stage: per-chunk structured summarization.
//!
//! Each chunk gets one schema-constrained LLM call carrying its time window;
//! chunks run with bounded intra-job parallelism and results are recombined
//! by chunk index, not arrival order.

use super::{Bullet, JobParams};
use crate::chunking::Chunk;
use crate::config::{MapPrompts, MapSettings, Prompts, Settings};
use crate::error::{OppsumError, Result};
use crate::llm::{extract_json_object, with_retries, LlmClient, LlmRequest, RetryPolicy};
use crate::transcript::format_timestamp_ms;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Structured output of mapping one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapResult {
    /// Index of the source chunk.
    pub chunk_index: usize,
    /// The chunk's time window, echoed back for validation.
    pub start_ms: u64,
    pub end_ms: u64,
    /// Extracted bullets in chronological order.
    pub bullets: Vec<Bullet>,
}

/// Executor for the map stage.
pub struct MapStage {
    client: Arc<dyn LlmClient>,
    prompts: MapPrompts,
    settings: MapSettings,
    retry: RetryPolicy,
    parallelism: usize,
}

impl MapStage {
    pub fn new(client: Arc<dyn LlmClient>, prompts: &Prompts, settings: &Settings) -> Self {
        Self {
            client,
            prompts: prompts.map.clone(),
            settings: settings.map.clone(),
            retry: RetryPolicy::from_settings(&settings.llm),
            parallelism: settings.pipeline.map_parallelism.max(1),
        }
    }

    /// Map all chunks with bounded parallelism.
    ///
    /// Cancellation is checked before each chunk is dispatched; the first
    /// chunk error fails the whole stage. `on_progress` receives
    /// `(completed, total)` as chunks finish, in completion order.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn map_all(
        &self,
        chunks: &[Chunk],
        params: &JobParams,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Vec<MapResult>> {
        let total = chunks.len();
        let mut results: Vec<Option<MapResult>> = vec![None; total];
        let mut completed = 0usize;

        type ChunkFuture<'a> = std::pin::Pin<
            Box<dyn std::future::Future<Output = (usize, Result<MapResult>)> + Send + 'a>,
        >;
        let mut futs: Vec<ChunkFuture<'_>> = Vec::with_capacity(total);
        for chunk in chunks {
            futs.push(Box::pin(self.map_chunk_indexed(chunk, params, cancel)));
        }
        let mut in_flight = stream::iter(futs).buffer_unordered(self.parallelism);

        while let Some((index, outcome)) = in_flight.next().await {
            match outcome {
                Ok(result) => {
                    results[index] = Some(result);
                    completed += 1;
                    on_progress(completed, total);
                }
                Err(e) => return Err(e),
            }
        }
        drop(in_flight);

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| OppsumError::Internal("missing map result".to_string())))
            .collect()
    }

    /// Map one chunk, pairing the result with its chunk index. Extracted from
    /// the `map_all` stream closure: calling a named `async fn` lets the
    /// compiler infer the borrow lifetimes that an inline `async move` closure
    /// over `&Chunk` cannot express.
    async fn map_chunk_indexed(
        &self,
        chunk: &Chunk,
        params: &JobParams,
        cancel: &CancellationToken,
    ) -> (usize, Result<MapResult>) {
        if cancel.is_cancelled() {
            return (chunk.index, Err(OppsumError::Canceled));
        }
        (chunk.index, self.map_chunk(chunk, params, cancel).await)
    }

    /// Map a single chunk, retrying schema failures with a correction hint.
    #[instrument(skip_all, fields(chunk = chunk.index))]
    pub async fn map_chunk(
        &self,
        chunk: &Chunk,
        params: &JobParams,
        cancel: &CancellationToken,
    ) -> Result<MapResult> {
        let mut correction: Option<String> = None;

        for attempt in 0..=self.settings.max_schema_retries {
            if cancel.is_cancelled() {
                return Err(OppsumError::Canceled);
            }

            let request = self.build_request(chunk, params, correction.as_deref());
            let raw = with_retries(&self.retry, |_| self.client.generate(&request)).await?;

            match Self::parse_payload(&raw, chunk) {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.settings.max_schema_retries => {
                    debug!("Map chunk {} attempt {} rejected: {}", chunk.index, attempt + 1, e);
                    correction = Some(format!(
                        "\n\nYour previous response was rejected: {}. \
                         Return only valid JSON matching the schema exactly.",
                        e
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        Err(OppsumError::Internal("map retry loop exited".to_string()))
    }

    fn build_request(
        &self,
        chunk: &Chunk,
        params: &JobParams,
        correction: Option<&str>,
    ) -> LlmRequest {
        let mut vars = HashMap::new();
        vars.insert("language".to_string(), params.language.clone());
        vars.insert("window_start".to_string(), format_timestamp_ms(chunk.start_ms));
        vars.insert("window_end".to_string(), format_timestamp_ms(chunk.end_ms));
        vars.insert("window_start_ms".to_string(), chunk.start_ms.to_string());
        vars.insert("window_end_ms".to_string(), chunk.end_ms.to_string());
        vars.insert("chunk".to_string(), chunk.format_with_timestamps());

        let mut user = Prompts::render(&self.prompts.user, &vars);
        if let Some(hint) = correction {
            user.push_str(hint);
        }

        LlmRequest {
            model: params.map_model.clone(),
            system: self.prompts.system.clone(),
            user,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    /// Parse and validate the model's JSON payload for one chunk.
    ///
    /// Missing fields are schema failures (retried with a hint); timestamps
    /// outside the chunk window are clamped into it rather than rejected.
    fn parse_payload(raw: &str, chunk: &Chunk) -> Result<MapResult> {
        #[derive(Deserialize)]
        struct Payload {
            bullets: Vec<RawBullet>,
        }

        #[derive(Deserialize)]
        struct RawBullet {
            timestamp_ms: u64,
            text: String,
            #[serde(default)]
            evidence_quote: Option<String>,
        }

        let json = extract_json_object(raw)?;
        let payload: Payload = serde_json::from_str(json)
            .map_err(|e| OppsumError::LlmValidation(format!("map output schema: {}", e)))?;

        if payload.bullets.is_empty() {
            return Err(OppsumError::LlmValidation(
                "map output contains no bullets".to_string(),
            ));
        }

        let mut bullets: Vec<Bullet> = payload
            .bullets
            .into_iter()
            .map(|b| Bullet {
                timestamp_ms: b.timestamp_ms.clamp(chunk.start_ms, chunk.end_ms),
                text: b.text,
                evidence_quote: b.evidence_quote,
            })
            .collect();
        bullets.sort_by_key(|b| b.timestamp_ms);

        Ok(MapResult {
            chunk_index: chunk.index,
            start_ms: chunk.start_ms,
            end_ms: chunk.end_ms,
            bullets,
        })
    }
}
