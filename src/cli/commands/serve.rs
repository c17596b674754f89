//! HTTP API server exposing the job pipeline.
//!
//! Submit, status, result, and cancel map straight onto the scheduler; the
//! per-job progress stream is exposed as Server-Sent Events over the job's
//! broadcast channel.

use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::JobParams;
use crate::scheduler::{JobEvent, JobResult, JobStatus, Scheduler};
use crate::transcript::{FileTranscriptSource, Transcript, TranscriptSegment, TranscriptSource};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state.
struct AppState {
    scheduler: Scheduler,
    settings: Settings,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let scheduler = super::build_scheduler(&settings, false)?;

    let state = Arc::new(AppState {
        scheduler,
        settings,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{job_id}", get(job_status))
        .route("/jobs/{job_id}/result", get(job_result))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .route("/jobs/{job_id}/events", get(job_events))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Oppsum API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit", "POST /jobs");
    Output::kv("List Jobs", "GET  /jobs");
    Output::kv("Status", "GET  /jobs/:id");
    Output::kv("Result", "GET  /jobs/:id/result");
    Output::kv("Cancel", "POST /jobs/:id/cancel");
    Output::kv("Events (SSE)", "GET  /jobs/:id/events");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SegmentPayload {
    start_ms: u64,
    end_ms: u64,
    text: String,
}

#[derive(Deserialize)]
struct SubmitRequest {
    /// Inline transcript segments.
    #[serde(default)]
    segments: Option<Vec<SegmentPayload>>,
    /// Alternatively, a server-local transcript file (.json or .srt).
    #[serde(default)]
    path: Option<String>,
    /// Identifier for the source media (defaults to the file stem).
    #[serde(default)]
    source_id: Option<String>,
    /// Per-job parameter overrides.
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    token_budget: Option<usize>,
    #[serde(default)]
    map_model: Option<String>,
    #[serde(default)]
    reduce_model: Option<String>,
    #[serde(default)]
    prompt_version: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobStatus>,
    total: usize,
}

#[derive(Serialize)]
struct CancelResponse {
    canceled: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let transcript = match build_transcript(&req).await {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut params = JobParams::from_settings(&state.settings);
    if let Some(language) = req.language {
        params.language = language;
    }
    if let Some(budget) = req.token_budget {
        params.token_budget = budget;
    }
    if let Some(model) = req.map_model {
        params.map_model = model;
    }
    if let Some(model) = req.reduce_model {
        params.reduce_model = model;
    }
    if let Some(version) = req.prompt_version {
        params.prompt_version = version;
    }

    match state.scheduler.submit(transcript, params).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmitResponse { job_id })).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn build_transcript(req: &SubmitRequest) -> crate::error::Result<Transcript> {
    if let Some(segments) = &req.segments {
        let source_id = req.source_id.clone().unwrap_or_else(|| "inline".to_string());
        let segments: Vec<TranscriptSegment> = segments
            .iter()
            .map(|s| TranscriptSegment::new(s.start_ms, s.end_ms, s.text.clone()))
            .collect();
        let transcript = Transcript::new(source_id, segments);
        transcript.check_invariants()?;
        return Ok(transcript);
    }

    if let Some(path) = &req.path {
        let source = FileTranscriptSource::new();
        let mut transcript = source.fetch(path).await?;
        if let Some(source_id) = &req.source_id {
            transcript.source_id = source_id.clone();
        }
        return Ok(transcript);
    }

    Err(crate::error::OppsumError::InvalidInput(
        "provide either segments or path".to_string(),
    ))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = state.scheduler.list().await;
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.status(&job_id).await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown job: {}", job_id)),
    }
}

async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.result(&job_id).await {
        None => error_response(StatusCode::NOT_FOUND, format!("unknown job: {}", job_id)),
        Some(JobResult::Pending) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "pending" })),
        )
            .into_response(),
        Some(JobResult::Succeeded(artifacts)) => Json(serde_json::json!({
            "status": "succeeded",
            "artifacts": artifacts.as_ref(),
        }))
        .into_response(),
        Some(JobResult::Failed(err)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "status": "failed",
                "error": err,
            })),
        )
            .into_response(),
        Some(JobResult::Canceled) => (
            StatusCode::GONE,
            Json(serde_json::json!({ "status": "canceled" })),
        )
            .into_response(),
    }
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let canceled = state.scheduler.cancel(&job_id).await;
    Json(CancelResponse { canceled })
}

/// Per-job progress stream as SSE. The stream ends after the terminal event.
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let receiver = state
        .scheduler
        .subscribe(&job_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let stream = futures::stream::unfold(Some(receiver), |rx| async move {
        let mut rx = rx?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let next = if event.is_terminal() { None } else { Some(rx) };
                    let sse = sse_event(&event)?;
                    return Some((Ok::<_, Infallible>(sse), next));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &JobEvent) -> Option<Event> {
    Event::default().json_data(event).ok()
}
