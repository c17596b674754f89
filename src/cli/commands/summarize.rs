//! Summarize command - run the pipeline on a local transcript file.

use crate::artifact;
use crate::cli::output::format_duration_ms;
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::{JobParams, ReducedSummary};
use crate::scheduler::JobResult;
use crate::transcript::{format_timestamp_ms, FileTranscriptSource, TranscriptSource};

/// Run the summarize command.
#[allow(clippy::too_many_arguments)]
pub async fn run_summarize(
    input: &str,
    language: Option<String>,
    budget: Option<usize>,
    map_model: Option<String>,
    reduce_model: Option<String>,
    output: Option<String>,
    no_cache: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let source = FileTranscriptSource::new();
    let transcript = source.fetch(input).await?;

    Output::info(&format!(
        "Loaded {} segments ({})",
        transcript.segments.len(),
        format_duration_ms(transcript.duration_ms)
    ));

    let mut params = JobParams::from_settings(&settings);
    if let Some(language) = language {
        params.language = language;
    }
    if let Some(budget) = budget {
        params.token_budget = budget;
    }
    if let Some(model) = map_model {
        params.map_model = model;
    }
    if let Some(model) = reduce_model {
        params.reduce_model = model;
    }

    let scheduler = super::build_scheduler(&settings, no_cache)?;
    let job_id = scheduler.submit(transcript, params).await?;

    // Drive a progress bar from the job's event stream.
    let pb = Output::progress_bar("summarizing");
    if let Some(mut events) = scheduler.subscribe(&job_id).await {
        while let Ok(event) = events.recv().await {
            pb.set_position(event.pct as u64);
            pb.set_message(event.message.clone());
            if event.is_terminal() {
                break;
            }
        }
    }
    pb.finish_and_clear();

    match scheduler.wait(&job_id).await {
        Some(JobResult::Succeeded(artifacts)) => {
            let status = scheduler.status(&job_id).await;
            if status.is_some_and(|s| s.cache_hit) {
                Output::info("Served from cache.");
            }

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(artifacts.as_ref())?;
                std::fs::write(&path, json)?;
                Output::success(&format!("Wrote artifacts to {}", path));
            } else {
                let reduced: ReducedSummary = artifacts
                    .get(artifact::REDUCED_SUMMARY)
                    .ok_or_else(|| anyhow::anyhow!("missing reduced_summary artifact"))?
                    .decode()?;
                print_summary(&reduced);
            }
            Ok(())
        }
        Some(JobResult::Failed(err)) => {
            Output::error(&format!(
                "Job failed at {} stage: {} ({})",
                err.stage, err.message, err.kind
            ));
            anyhow::bail!("summarization failed: {}", err.kind)
        }
        Some(JobResult::Canceled) => {
            Output::warning("Job was canceled.");
            Ok(())
        }
        _ => anyhow::bail!("job disappeared before completing"),
    }
}

fn print_summary(reduced: &ReducedSummary) {
    Output::header("Summary");
    for bullet in &reduced.summary {
        Output::bullet(&format_timestamp_ms(bullet.timestamp_ms), &bullet.text);
    }

    Output::header("Key Ideas");
    for bullet in &reduced.key_ideas {
        Output::bullet(&format_timestamp_ms(bullet.timestamp_ms), &bullet.text);
    }

    Output::header("Takeaways");
    for bullet in &reduced.takeaways {
        Output::bullet(&format_timestamp_ms(bullet.timestamp_ms), &bullet.text);
    }
    println!();
}
