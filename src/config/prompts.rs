//! Prompt templates for Oppsum.
//!
//! Templates use `{{variable}}` placeholders rendered at call time. The
//! active prompt set is versioned through `cache.prompt_version`; editing a
//! template without bumping the version will serve stale cached artifacts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub map: MapPrompts,
    pub reduce: ReducePrompts,
}

impl Prompts {
    /// Render a template, substituting `{{key}}` with values from `vars`.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut out = template.to_string();
        for (key, value) in vars {
            out = out.replace(&format!("{{{{{}}}}}", key), value);
        }
        out
    }
}

/// Prompts for the per-chunk map stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapPrompts {
    pub system: String,
    pub user: String,
}

impl Default for MapPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a transcript analyst. You extract the key points from one slice of a longer timestamped transcript.

Rules:
- Every bullet must carry a timestamp in milliseconds taken from the slice you are given.
- Timestamps must lie inside the slice's time window.
- Where a bullet states a claim made by the speaker, include a short verbatim supporting quote from the transcript as "evidence_quote".
- Skip filler: greetings, subscription requests, sponsor reads, sign-offs.
- Respond with JSON only, matching the requested schema exactly."#
                .to_string(),

            user: r#"Language: {{language}}
Time window: {{window_start}} to {{window_end}} ({{window_start_ms}}ms to {{window_end_ms}}ms)

Transcript slice:
{{chunk}}

Extract the key points as JSON:
{
  "bullets": [
    {"timestamp_ms": 12000, "text": "...", "evidence_quote": "..."}
  ]
}

- 3 to 8 bullets, in chronological order
- "timestamp_ms" is required on every bullet and must be between {{window_start_ms}} and {{window_end_ms}}
- "evidence_quote" is optional but encouraged"#
                .to_string(),
        }
    }
}

/// Prompts for the reduce (merge/finalize) stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducePrompts {
    pub system: String,
    pub user: String,
}

impl Default for ReducePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are an editor producing the final structured summary of a long transcript from pre-extracted, timestamped bullet points.

Rules:
- Keep every bullet anchored to a timestamp from the input; never invent timestamps.
- Organize the output into three sections: "summary" (narrative flow of the content), "key_ideas" (the substantive concepts), "takeaways" (actionable or memorable conclusions).
- Spread summary bullets across the whole duration of the source.
- Carry forward "evidence_quote" fields where the input bullets have them.
- Respond with JSON only, matching the requested schema exactly."#
                .to_string(),

            user: r#"Language: {{language}}
Source duration: {{duration}}

Timestamped bullet points extracted from the transcript:
{{bullets}}

Produce the final summary as JSON:
{
  "summary": [{"timestamp_ms": 0, "text": "...", "evidence_quote": "..."}],
  "key_ideas": [{"timestamp_ms": 0, "text": "..."}],
  "takeaways": [{"timestamp_ms": 0, "text": "..."}]
}

- Each section is a chronologically ordered list of bullets
- "timestamp_ms" is required on every bullet{{corrections}}"#
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_variables() {
        let mut vars = HashMap::new();
        vars.insert("language".to_string(), "en".to_string());
        vars.insert("chunk".to_string(), "[00:00] hi".to_string());

        let out = Prompts::render("lang={{language}} text={{chunk}}", &vars);
        assert_eq!(out, "lang=en text=[00:00] hi");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let vars = HashMap::new();
        let out = Prompts::render("{{missing}}", &vars);
        assert_eq!(out, "{{missing}}");
    }

    #[test]
    fn test_default_templates_have_placeholders() {
        let p = Prompts::default();
        assert!(p.map.user.contains("{{chunk}}"));
        assert!(p.map.user.contains("{{window_start_ms}}"));
        assert!(p.reduce.user.contains("{{bullets}}"));
        assert!(p.reduce.user.contains("{{corrections}}"));
    }
}
