//! Token-budget chunking for Oppsum.
//!
//! Splits a transcript into token-bounded chunks at segment boundaries while
//! preserving full timestamp coverage. Pure and deterministic: identical
//! input always produces identical chunk boundaries.

use crate::error::Result;
use crate::transcript::{Transcript, TranscriptSegment};
use serde::{Deserialize, Serialize};

/// A token-bounded, timestamp-preserving slice of a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the transcript (0-based).
    pub index: usize,
    /// Segments belonging to this chunk, in transcript order.
    pub segments: Vec<TranscriptSegment>,
    /// Start of the covered time window in milliseconds.
    pub start_ms: u64,
    /// End of the covered time window in milliseconds.
    pub end_ms: u64,
    /// Estimated token count of the chunk text.
    pub token_count: usize,
    /// Set when a single segment alone exceeded the budget. Oversized chunks
    /// are passed through whole; truncation would destroy timestamp fidelity.
    pub oversized: bool,
}

impl Chunk {
    /// Concatenated text of all segments in this chunk.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format the chunk's segments with timestamps for the map prompt.
    pub fn format_with_timestamps(&self) -> String {
        self.segments
            .iter()
            .map(|s| {
                format!(
                    "[{} - {}] {}",
                    crate::transcript::format_timestamp_ms(s.start_ms),
                    crate::transcript::format_timestamp_ms(s.end_ms),
                    s.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Estimate the token count of a piece of text.
///
/// Character-based proxy: one token per four characters of trimmed text,
/// rounded up, minimum one. Pinned by tests; changing this changes chunk
/// boundaries and therefore cache fingerprints.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.trim().chars().count();
    std::cmp::max(1, chars.div_ceil(4))
}

/// Split a transcript into token-bounded chunks.
///
/// Accumulates consecutive segments while the running token estimate stays
/// within `token_budget`; the segment that would overflow starts a new chunk.
/// A single segment whose own estimate exceeds the budget becomes its own
/// oversized chunk. The union of chunk windows equals the transcript span.
pub fn chunk(transcript: &Transcript, token_budget: usize) -> Result<Vec<Chunk>> {
    transcript.check_invariants()?;

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<TranscriptSegment> = Vec::new();
    let mut current_tokens = 0usize;

    let close = |chunks: &mut Vec<Chunk>, segments: Vec<TranscriptSegment>, tokens: usize| {
        if segments.is_empty() {
            return;
        }
        let start_ms = segments.first().map(|s| s.start_ms).unwrap_or(0);
        let end_ms = segments.last().map(|s| s.end_ms).unwrap_or(0);
        let oversized = segments.len() == 1 && tokens > token_budget;
        chunks.push(Chunk {
            index: chunks.len(),
            segments,
            start_ms,
            end_ms,
            token_count: tokens,
            oversized,
        });
    };

    for seg in &transcript.segments {
        let seg_tokens = estimate_tokens(&seg.text);

        if seg_tokens > token_budget {
            // Oversized segment: flush the running chunk, then emit the
            // segment alone.
            close(&mut chunks, std::mem::take(&mut current), current_tokens);
            current_tokens = 0;
            close(&mut chunks, vec![seg.clone()], seg_tokens);
            continue;
        }

        if current_tokens + seg_tokens > token_budget && !current.is_empty() {
            close(&mut chunks, std::mem::take(&mut current), current_tokens);
            current_tokens = 0;
        }

        current.push(seg.clone());
        current_tokens += seg_tokens;
    }

    close(&mut chunks, current, current_tokens);

    Ok(chunks)
}
