//! Reduce stage: merge map partials into the final structured summary.
//!
//! Bullets from all chunks are merged, sorted chronologically, and
//! near-duplicates dropped before a single higher-tier LLM call produces the
//! final sections. The corrective variant re-runs the same call with the
//! validation failure reasons appended.

use super::{Bullet, JobParams, MapResult};
use crate::config::{Prompts, ReducePrompts, ReduceSettings, Settings};
use crate::error::{OppsumError, Result};
use crate::llm::{extract_json_object, with_retries, LlmClient, LlmRequest, RetryPolicy};
use crate::transcript::format_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Near-duplicate threshold: bullets whose lowercase word sets overlap at or
/// above this Jaccard similarity are considered the same point.
const DEDUP_JACCARD_THRESHOLD: f64 = 0.8;

/// The final structured summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducedSummary {
    /// Narrative flow of the content.
    pub summary: Vec<Bullet>,
    /// Substantive concepts covered.
    pub key_ideas: Vec<Bullet>,
    /// Actionable or memorable conclusions.
    pub takeaways: Vec<Bullet>,
}

impl ReducedSummary {
    /// All bullets across sections, in section order.
    pub fn all_bullets(&self) -> impl Iterator<Item = &Bullet> {
        self.summary
            .iter()
            .chain(self.key_ideas.iter())
            .chain(self.takeaways.iter())
    }
}

/// Executor for the reduce stage.
pub struct ReduceStage {
    client: Arc<dyn LlmClient>,
    prompts: ReducePrompts,
    settings: ReduceSettings,
    retry: RetryPolicy,
}

impl ReduceStage {
    pub fn new(client: Arc<dyn LlmClient>, prompts: &Prompts, settings: &Settings) -> Self {
        Self {
            client,
            prompts: prompts.reduce.clone(),
            settings: settings.reduce.clone(),
            retry: RetryPolicy::from_settings(&settings.llm),
        }
    }

    /// Run the reduce call over all map partials.
    #[instrument(skip_all, fields(partials = map_results.len()))]
    pub async fn reduce(
        &self,
        map_results: &[MapResult],
        duration_ms: u64,
        params: &JobParams,
        cancel: &CancellationToken,
    ) -> Result<ReducedSummary> {
        self.run(map_results, duration_ms, params, cancel, None).await
    }

    /// Corrective reduce: same call with the validation failure reasons
    /// appended to the prompt. Invoked at most once per job.
    #[instrument(skip_all)]
    pub async fn reduce_corrective(
        &self,
        map_results: &[MapResult],
        duration_ms: u64,
        params: &JobParams,
        cancel: &CancellationToken,
        reasons: &str,
    ) -> Result<ReducedSummary> {
        self.run(map_results, duration_ms, params, cancel, Some(reasons))
            .await
    }

    async fn run(
        &self,
        map_results: &[MapResult],
        duration_ms: u64,
        params: &JobParams,
        cancel: &CancellationToken,
        corrections: Option<&str>,
    ) -> Result<ReducedSummary> {
        let merged = Self::merge_bullets(map_results);
        if merged.is_empty() {
            return Err(OppsumError::LlmValidation(
                "no bullets to reduce".to_string(),
            ));
        }

        let mut correction_hint: Option<String> = None;

        for attempt in 0..=self.settings.max_schema_retries {
            if cancel.is_cancelled() {
                return Err(OppsumError::Canceled);
            }

            let request = self.build_request(
                &merged,
                duration_ms,
                params,
                corrections,
                correction_hint.as_deref(),
            );
            let raw = with_retries(&self.retry, |_| self.client.generate(&request)).await?;

            match Self::parse_payload(&raw, duration_ms) {
                Ok(reduced) => return Ok(reduced),
                Err(e) if attempt < self.settings.max_schema_retries => {
                    debug!("Reduce attempt {} rejected: {}", attempt + 1, e);
                    correction_hint = Some(format!(
                        "\n\nYour previous response was rejected: {}. \
                         Return only valid JSON matching the schema exactly.",
                        e
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        Err(OppsumError::Internal("reduce retry loop exited".to_string()))
    }

    /// Merge bullets from all partials: chronological order, near-duplicates
    /// dropped (the earliest bullet wins).
    pub fn merge_bullets(map_results: &[MapResult]) -> Vec<Bullet> {
        let mut all: Vec<Bullet> = map_results
            .iter()
            .flat_map(|r| r.bullets.iter().cloned())
            .collect();
        all.sort_by_key(|b| b.timestamp_ms);

        let mut kept: Vec<Bullet> = Vec::with_capacity(all.len());
        for bullet in all {
            let duplicate = kept
                .iter()
                .any(|k| jaccard_similarity(&k.text, &bullet.text) >= DEDUP_JACCARD_THRESHOLD);
            if !duplicate {
                kept.push(bullet);
            }
        }
        kept
    }

    fn build_request(
        &self,
        merged: &[Bullet],
        duration_ms: u64,
        params: &JobParams,
        corrections: Option<&str>,
        schema_hint: Option<&str>,
    ) -> LlmRequest {
        let bullet_lines = merged
            .iter()
            .map(|b| {
                let mut line = format!(
                    "- [{} | {}ms] {}",
                    format_timestamp_ms(b.timestamp_ms),
                    b.timestamp_ms,
                    b.text
                );
                if let Some(quote) = &b.evidence_quote {
                    line.push_str(&format!(" (quote: \"{}\")", quote));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");

        let correction_block = match corrections {
            Some(reasons) => format!(
                "\n\nA previous summary of this material failed validation:\n{}\n\
                 Fix these problems in your output.",
                reasons
            ),
            None => String::new(),
        };

        let mut vars = HashMap::new();
        vars.insert("language".to_string(), params.language.clone());
        vars.insert("duration".to_string(), format_timestamp_ms(duration_ms));
        vars.insert("bullets".to_string(), bullet_lines);
        vars.insert("corrections".to_string(), correction_block);

        let mut user = Prompts::render(&self.prompts.user, &vars);
        if let Some(hint) = schema_hint {
            user.push_str(hint);
        }

        LlmRequest {
            model: params.reduce_model.clone(),
            system: self.prompts.system.clone(),
            user,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    /// Parse and validate the reduce payload.
    fn parse_payload(raw: &str, duration_ms: u64) -> Result<ReducedSummary> {
        #[derive(Deserialize)]
        struct Payload {
            summary: Vec<RawBullet>,
            key_ideas: Vec<RawBullet>,
            takeaways: Vec<RawBullet>,
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
            .map_err(|e| OppsumError::LlmValidation(format!("reduce output schema: {}", e)))?;

        if payload.summary.is_empty() {
            return Err(OppsumError::LlmValidation(
                "reduce output has an empty summary section".to_string(),
            ));
        }

        let convert = |raw: Vec<RawBullet>| -> Vec<Bullet> {
            let mut bullets: Vec<Bullet> = raw
                .into_iter()
                .map(|b| Bullet {
                    timestamp_ms: b.timestamp_ms.min(duration_ms),
                    text: b.text,
                    evidence_quote: b.evidence_quote,
                })
                .collect();
            bullets.sort_by_key(|b| b.timestamp_ms);
            bullets
        };

        Ok(ReducedSummary {
            summary: convert(payload.summary),
            key_ideas: convert(payload.key_ideas),
            takeaways: convert(payload.takeaways),
        })
    }
}

/// Jaccard similarity over lowercase word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLlm {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn generate(&self, _request: &LlmRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn bullet(ts: u64, text: &str) -> Bullet {
        Bullet {
            timestamp_ms: ts,
            text: text.to_string(),
            evidence_quote: None,
        }
    }

    fn partial(index: usize, bullets: Vec<Bullet>) -> MapResult {
        MapResult {
            chunk_index: index,
            start_ms: 0,
            end_ms: 60_000,
            bullets,
        }
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("the same words", "the same words"), 1.0);
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
        let partial_overlap = jaccard_similarity("a b c d", "a b c e");
        assert!(partial_overlap > 0.5 && partial_overlap < 1.0);
    }

    #[test]
    fn test_merge_sorts_chronologically() {
        let merged = ReduceStage::merge_bullets(&[
            partial(1, vec![bullet(90_000, "late point")]),
            partial(0, vec![bullet(10_000, "early point")]),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].timestamp_ms, 10_000);
        assert_eq!(merged[1].timestamp_ms, 90_000);
    }

    #[test]
    fn test_merge_drops_near_duplicates_keeping_earliest() {
        let merged = ReduceStage::merge_bullets(&[
            partial(0, vec![bullet(5_000, "rust ownership prevents data races")]),
            partial(
                1,
                vec![bullet(65_000, "rust ownership prevents data races")],
            ),
            partial(2, vec![bullet(120_000, "a completely different idea")]),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].timestamp_ms, 5_000);
        assert_eq!(merged[1].timestamp_ms, 120_000);
    }

    #[test]
    fn test_merge_keeps_dissimilar_bullets() {
        let merged = ReduceStage::merge_bullets(&[partial(
            0,
            vec![
                bullet(1_000, "the borrow checker enforces aliasing rules"),
                bullet(2_000, "async tasks are cooperatively scheduled"),
            ],
        )]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn test_reduce_parses_sections() {
        let response = r#"{
            "summary": [{"timestamp_ms": 1000, "text": "intro"}],
            "key_ideas": [{"timestamp_ms": 30000, "text": "main idea", "evidence_quote": "as I said"}],
            "takeaways": [{"timestamp_ms": 55000, "text": "do the thing"}]
        }"#;

        let client = Arc::new(FixedLlm {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        });
        let stage = ReduceStage::new(client, &Prompts::default(), &Settings::default());

        let reduced = stage
            .reduce(
                &[partial(0, vec![bullet(1_000, "x")])],
                60_000,
                &JobParams::from_settings(&Settings::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reduced.summary.len(), 1);
        assert_eq!(reduced.key_ideas[0].evidence_quote.as_deref(), Some("as I said"));
        assert_eq!(reduced.all_bullets().count(), 3);
    }

    #[tokio::test]
    async fn test_reduce_empty_summary_is_schema_failure() {
        let response = r#"{"summary": [], "key_ideas": [], "takeaways": []}"#;
        let client = Arc::new(FixedLlm {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        });
        let mut settings = Settings::default();
        settings.llm.backoff_base_ms = 1;
        let stage = ReduceStage::new(client.clone(), &Prompts::default(), &settings);

        let err = stage
            .reduce(
                &[partial(0, vec![bullet(1_000, "x")])],
                60_000,
                &JobParams::from_settings(&settings),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OppsumError::LlmValidation(_)));
        // One initial attempt plus max_schema_retries corrective attempts.
        assert_eq!(
            client.calls.load(Ordering::SeqCst) as u32,
            settings.reduce.max_schema_retries + 1
        );
    }

    #[tokio::test]
    async fn test_reduce_timestamps_clamped_to_duration() {
        let response = r#"{
            "summary": [{"timestamp_ms": 999999999, "text": "late"}],
            "key_ideas": [],
            "takeaways": []
        }"#;
        let client = Arc::new(FixedLlm {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        });
        let stage = ReduceStage::new(client, &Prompts::default(), &Settings::default());

        let reduced = stage
            .reduce(
                &[partial(0, vec![bullet(1_000, "x")])],
                60_000,
                &JobParams::from_settings(&Settings::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reduced.summary[0].timestamp_ms, 60_000);
    }
}
