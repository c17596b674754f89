//! File-based transcript source (JSON and SRT).
//!
//! Lets the CLI run end-to-end on exported caption files. Network acquisition
//! (captions APIs, ASR) is out of scope and lives behind the same trait.

use super::{Transcript, TranscriptSegment, TranscriptSource};
use crate::error::{OppsumError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Transcript source reading local `.json` or `.srt` files.
pub struct FileTranscriptSource;

impl FileTranscriptSource {
    pub fn new() -> Self {
        Self
    }

    /// Parse a transcript from file contents, dispatching on extension.
    pub fn parse(path: &Path, contents: &str) -> Result<Transcript> {
        let source_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("transcript")
            .to_string();

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let segments = match ext.as_deref() {
            Some("json") => parse_json(contents)?,
            Some("srt") => parse_srt(contents)?,
            other => {
                return Err(OppsumError::InvalidInput(format!(
                    "Unsupported transcript format: {:?}. Use .json or .srt.",
                    other.unwrap_or("none")
                )))
            }
        };

        if segments.is_empty() {
            return Err(OppsumError::CaptionsNotFound(format!(
                "{} contains no caption segments",
                path.display()
            )));
        }

        let transcript = Transcript::new(source_id, segments);
        transcript.check_invariants()?;
        Ok(transcript)
    }
}

impl Default for FileTranscriptSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptSource for FileTranscriptSource {
    async fn fetch(&self, media_ref: &str) -> Result<Transcript> {
        let path = PathBuf::from(media_ref);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            OppsumError::VideoUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&path, &contents)
    }
}

/// JSON segment record as exported by caption tooling.
#[derive(Debug, Deserialize)]
struct JsonSegment {
    start_ms: u64,
    end_ms: u64,
    text: String,
}

/// Wrapper form: `{"segments": [...]}`. A bare array is also accepted.
#[derive(Debug, Deserialize)]
struct JsonTranscript {
    segments: Vec<JsonSegment>,
}

fn parse_json(contents: &str) -> Result<Vec<TranscriptSegment>> {
    let records: Vec<JsonSegment> = match serde_json::from_str::<JsonTranscript>(contents) {
        Ok(wrapper) => wrapper.segments,
        Err(_) => serde_json::from_str(contents)?,
    };

    Ok(records
        .into_iter()
        .map(|r| TranscriptSegment::new(r.start_ms, r.end_ms, r.text))
        .collect())
}

/// Parse SRT cues: index line, `HH:MM:SS,mmm --> HH:MM:SS,mmm`, text lines.
fn parse_srt(contents: &str) -> Result<Vec<TranscriptSegment>> {
    let mut segments = Vec::new();

    for block in contents.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else { continue };

        // The index line is optional in practice; the timing line is not.
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(l) if l.contains("-->") => l,
                _ => continue,
            }
        };

        let (start_raw, end_raw) = timing
            .split_once("-->")
            .ok_or_else(|| OppsumError::InvalidInput(format!("bad SRT timing line: {}", timing)))?;

        let start_ms = parse_srt_timestamp(start_raw.trim())?;
        let end_ms = parse_srt_timestamp(end_raw.trim())?;

        let text = lines.collect::<Vec<_>>().join(" ");
        if text.trim().is_empty() {
            continue;
        }

        segments.push(TranscriptSegment::new(start_ms, end_ms, text.trim()));
    }

    Ok(segments)
}

/// Parse `HH:MM:SS,mmm` (or `HH:MM:SS.mmm`) into milliseconds.
fn parse_srt_timestamp(raw: &str) -> Result<u64> {
    let normalized = raw.replace(',', ".");
    let (clock, millis) = normalized
        .split_once('.')
        .ok_or_else(|| OppsumError::InvalidInput(format!("bad SRT timestamp: {}", raw)))?;

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(OppsumError::InvalidInput(format!(
            "bad SRT timestamp: {}",
            raw
        )));
    }

    let parse = |s: &str| -> Result<u64> {
        s.parse::<u64>()
            .map_err(|_| OppsumError::InvalidInput(format!("bad SRT timestamp: {}", raw)))
    };

    let hours = parse(parts[0])?;
    let minutes = parse(parts[1])?;
    let seconds = parse(parts[2])?;
    let millis = parse(millis)?;

    Ok(((hours * 3600 + minutes * 60 + seconds) * 1000) + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_wrapper() {
        let json = r#"{"segments": [
            {"start_ms": 0, "end_ms": 4000, "text": "Hello"},
            {"start_ms": 4000, "end_ms": 9000, "text": "World"}
        ]}"#;

        let t = FileTranscriptSource::parse(Path::new("talk.json"), json).unwrap();
        assert_eq!(t.source_id, "talk");
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[1].text, "World");
    }

    #[test]
    fn test_parse_json_bare_array() {
        let json = r#"[{"start_ms": 0, "end_ms": 1000, "text": "Hi"}]"#;
        let t = FileTranscriptSource::parse(Path::new("x.json"), json).unwrap();
        assert_eq!(t.segments.len(), 1);
    }

    #[test]
    fn test_parse_srt() {
        let srt = "1\n00:00:00,000 --> 00:00:04,500\nHello there\n\n2\n00:00:04,500 --> 00:01:02,000\nGeneral Kenobi\n";
        let t = FileTranscriptSource::parse(Path::new("sub.srt"), srt).unwrap();
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].end_ms, 4500);
        assert_eq!(t.segments[1].end_ms, 62_000);
        assert_eq!(t.segments[1].text, "General Kenobi");
    }

    #[test]
    fn test_parse_srt_multiline_cue() {
        let srt = "1\n00:00:00,000 --> 00:00:03,000\nline one\nline two\n";
        let t = FileTranscriptSource::parse(Path::new("sub.srt"), srt).unwrap();
        assert_eq!(t.segments[0].text, "line one line two");
    }

    #[test]
    fn test_empty_file_is_captions_not_found() {
        let err = FileTranscriptSource::parse(Path::new("sub.srt"), "").unwrap_err();
        assert!(matches!(err, OppsumError::CaptionsNotFound(_)));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = FileTranscriptSource::parse(Path::new("sub.xml"), "<x/>").unwrap_err();
        assert!(matches!(err, OppsumError::InvalidInput(_)));
    }

    #[test]
    fn test_parse_srt_timestamp() {
        assert_eq!(parse_srt_timestamp("00:00:01,250").unwrap(), 1250);
        assert_eq!(parse_srt_timestamp("01:02:03,004").unwrap(), 3_723_004);
        assert!(parse_srt_timestamp("nonsense").is_err());
    }
}
