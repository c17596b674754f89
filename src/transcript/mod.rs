//! Transcript data model for Oppsum.
//!
//! A transcript is an ordered sequence of timestamped segments. Acquisition
//! (captions APIs, uploads, ASR) lives behind the [`TranscriptSource`] trait.

mod file;

pub use file::FileTranscriptSource;

use crate::error::{OppsumError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single segment of a transcript with millisecond timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in milliseconds.
    pub start_ms: u64,
    /// End time in milliseconds.
    pub end_ms: u64,
    /// Transcribed text content.
    pub text: String,
}

impl TranscriptSegment {
    /// Create a new transcript segment.
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Duration of this segment in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// A complete transcript with segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Identifier of the source media.
    pub source_id: String,
    /// Individual transcript segments with timestamps.
    pub segments: Vec<TranscriptSegment>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl Transcript {
    /// Create a new transcript from segments.
    pub fn new(source_id: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        let duration_ms = segments.last().map(|s| s.end_ms).unwrap_or(0);
        Self {
            source_id: source_id.into(),
            segments,
            duration_ms,
        }
    }

    /// Check the segment invariants: non-empty, each `start_ms < end_ms`,
    /// starts monotonically non-decreasing.
    pub fn check_invariants(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(OppsumError::InvalidInput(
                "transcript has no segments".to_string(),
            ));
        }
        let mut prev_start = 0u64;
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.start_ms >= seg.end_ms {
                return Err(OppsumError::InvalidInput(format!(
                    "segment {} has start_ms {} >= end_ms {}",
                    i, seg.start_ms, seg.end_ms
                )));
            }
            if seg.start_ms < prev_start {
                return Err(OppsumError::InvalidInput(format!(
                    "segment {} starts at {}ms, before previous segment at {}ms",
                    i, seg.start_ms, prev_start
                )));
            }
            prev_start = seg.start_ms;
        }
        Ok(())
    }

    /// Full transcript text (concatenated segments).
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Get the text content of segments overlapping a time window.
    pub fn text_between(&self, start_ms: u64, end_ms: u64) -> String {
        self.segments
            .iter()
            .filter(|s| s.start_ms < end_ms && s.end_ms > start_ms)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format the transcript with timestamps for prompts and display.
    pub fn format_with_timestamps(&self) -> String {
        self.segments
            .iter()
            .map(|s| {
                format!(
                    "[{} - {}] {}",
                    format_timestamp_ms(s.start_ms),
                    format_timestamp_ms(s.end_ms),
                    s.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Deterministic content hash over the segment data.
    ///
    /// Feeds the cache fingerprint: identical segment content hashes
    /// identically regardless of source id or wall-clock time.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for seg in &self.segments {
            hasher.update(seg.start_ms.to_le_bytes());
            hasher.update(seg.end_ms.to_le_bytes());
            hasher.update(seg.text.as_bytes());
            hasher.update([0u8]);
        }
        hex_digest(hasher)
    }
}

/// Trait for transcript acquisition backends.
///
/// Implementations fail with `VideoUnavailable` or `CaptionsNotFound`;
/// the pipeline surfaces those verbatim without retrying.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Fetch the transcript for a media reference.
    async fn fetch(&self, media_ref: &str) -> Result<Transcript>;
}

/// Format milliseconds as MM:SS or HH:MM:SS.
pub fn format_timestamp_ms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
