//! Validation of reduced summaries against the source transcript.
//!
//! Two scores: bucketed timestamp coverage of the media duration, and
//! evidence overlap for bullets that carry quotes. A failed verdict triggers
//! exactly one corrective reduce; a second failure is terminal.

use super::ReducedSummary;
use crate::config::ValidationSettings;
use crate::transcript::Transcript;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of validating a reduced summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Fraction of duration buckets touched by bullet timestamps.
    pub coverage_pct: f64,
    /// Fraction of quoted bullets whose evidence matches the transcript.
    pub overlap_score: f64,
    pub passed: bool,
    /// Human-readable failure reasons, fed to the corrective reduce prompt.
    pub reasons: Vec<String>,
}

/// Scores reduced summaries; pure and synchronous.
pub struct Validator {
    settings: ValidationSettings,
    whitespace: Regex,
}

impl Validator {
    pub fn new(settings: &ValidationSettings) -> Self {
        Self {
            settings: settings.clone(),
            whitespace: Regex::new(r"\s+").expect("static regex"),
        }
    }

    pub fn validate(&self, reduced: &ReducedSummary, transcript: &Transcript) -> ValidationVerdict {
        let coverage_pct = self.coverage(reduced, transcript.duration_ms);
        let overlap_score = self.overlap(reduced, transcript);

        let mut reasons = Vec::new();
        if coverage_pct < self.settings.coverage_min {
            reasons.push(format!(
                "timestamp coverage {:.0}% is below the required {:.0}%: \
                 bullets cluster in too little of the source; spread them across the full duration",
                coverage_pct * 100.0,
                self.settings.coverage_min * 100.0
            ));
        }
        if overlap_score < self.settings.overlap_min {
            reasons.push(format!(
                "evidence overlap {:.0}% is below the required {:.0}%: \
                 quotes must be verbatim text from near their claimed timestamp",
                overlap_score * 100.0,
                self.settings.overlap_min * 100.0
            ));
        }

        ValidationVerdict {
            coverage_pct,
            overlap_score,
            passed: reasons.is_empty(),
            reasons,
        }
    }

    /// Bucketed coverage: the duration is divided into fixed buckets and a
    /// bullet timestamp covers its bucket. Point coverage would reward a
    /// cluster of bullets at one spot; buckets measure spread.
    fn coverage(&self, reduced: &ReducedSummary, duration_ms: u64) -> f64 {
        if duration_ms == 0 {
            return 0.0;
        }

        let bucket_ms = self.settings.bucket_seconds.max(1) * 1000;
        let bucket_count = duration_ms.div_ceil(bucket_ms) as usize;
        let mut covered = vec![false; bucket_count];

        for bullet in reduced.all_bullets() {
            let idx = (bullet.timestamp_ms / bucket_ms) as usize;
            if idx < bucket_count {
                covered[idx] = true;
            }
        }

        covered.iter().filter(|c| **c).count() as f64 / bucket_count as f64
    }

    /// Evidence overlap: each quoted bullet's evidence must appear
    /// (normalized) in the transcript text around its claimed timestamp.
    /// Vacuously 1.0 when no bullet carries a quote.
    fn overlap(&self, reduced: &ReducedSummary, transcript: &Transcript) -> f64 {
        let slack_ms = self.settings.overlap_slack_seconds * 1000;

        let mut quoted = 0usize;
        let mut matched = 0usize;

        for bullet in reduced.all_bullets() {
            let Some(quote) = &bullet.evidence_quote else {
                continue;
            };
            quoted += 1;

            let window_start = bullet.timestamp_ms.saturating_sub(slack_ms);
            let window_end = bullet.timestamp_ms.saturating_add(slack_ms);
            let window_text = transcript.text_between(window_start, window_end);

            if self.normalize(&window_text).contains(&self.normalize(quote)) {
                matched += 1;
            }
        }

        if quoted == 0 {
            1.0
        } else {
            matched as f64 / quoted as f64
        }
    }

    /// Lowercase, strip punctuation, collapse whitespace.
    fn normalize(&self, text: &str) -> String {
        let lowered: String = text
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();
        self.whitespace.replace_all(lowered.trim(), " ").to_string()
    }
}
