//! Job scheduler and state machine for Oppsum.
//!
//! The scheduler owns every job for its lifetime: it admits submissions under
//! a fixed concurrency ceiling, drives admitted jobs through the pipeline
//! stages, exposes cooperative cancellation, and publishes progress events.
//! Stage executors return results; only the scheduler mutates job state.

mod events;
mod job;

pub use events::{JobEvent, EVENT_CHANNEL_CAPACITY};
pub use job::{JobError, JobResult, JobState, JobStatus, Stage};

use crate::artifact::{self, Artifact, ArtifactSet};
use crate::cache::{ArtifactCache, Fingerprint};
use crate::chunking;
use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::config::{Prompts, Settings};
use crate::error::{OppsumError, Result};
use crate::llm::LlmClient;
use crate::pipeline::{JobParams, MapStage, ReduceStage, Validator};
use crate::transcript::Transcript;
use futures::FutureExt;
use job::JobRecord;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

// Progress checkpoints per stage; the map stage interpolates across its span.
const PCT_INGEST: u8 = 5;
const PCT_MAP_START: u8 = 10;
const MAP_SPAN: u8 = 60;
const PCT_REDUCE: u8 = 75;
const PCT_VALIDATE: u8 = 90;
const PCT_FINALIZE: u8 = 95;

/// One job's entry in the scheduler's table.
struct JobEntry {
    record: JobRecord,
    progress: Arc<AtomicU8>,
    cancel: CancellationToken,
    events: broadcast::Sender<JobEvent>,
}

/// Queue and running-count bookkeeping, guarded by a single mutex so the
/// concurrency ceiling holds exactly.
struct AdmissionState {
    running: usize,
    queue: VecDeque<String>,
}

/// The job scheduler.
///
/// Cheap to clone through its inner `Arc`; all methods take `&self`.
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    map_stage: MapStage,
    reduce_stage: ReduceStage,
    validator: Validator,
    cache: Arc<dyn ArtifactCache>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    jobs: RwLock<HashMap<String, JobEntry>>,
    admission: Mutex<AdmissionState>,
}

/// Cloned-out context a run task needs; keeps the jobs lock out of the hot path.
struct JobCtx {
    transcript: Arc<Transcript>,
    params: JobParams,
    cancel: CancellationToken,
    events: broadcast::Sender<JobEvent>,
    progress: Arc<AtomicU8>,
}

impl Scheduler {
    /// Create a scheduler with system clock and UUID job ids.
    pub fn new(
        settings: Settings,
        prompts: Prompts,
        client: Arc<dyn LlmClient>,
        cache: Arc<dyn ArtifactCache>,
    ) -> Self {
        Self::with_providers(
            settings,
            prompts,
            client,
            cache,
            Arc::new(SystemClock),
            Arc::new(UuidGenerator),
        )
    }

    /// Create a scheduler with injected clock and id generator.
    pub fn with_providers(
        settings: Settings,
        prompts: Prompts,
        client: Arc<dyn LlmClient>,
        cache: Arc<dyn ArtifactCache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let map_stage = MapStage::new(client.clone(), &prompts, &settings);
        let reduce_stage = ReduceStage::new(client, &prompts, &settings);
        let validator = Validator::new(&settings.validation);

        Self {
            inner: Arc::new(Inner {
                settings,
                map_stage,
                reduce_stage,
                validator,
                cache,
                clock,
                ids,
                jobs: RwLock::new(HashMap::new()),
                admission: Mutex::new(AdmissionState {
                    running: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a transcript for summarization. Returns the job id.
    ///
    /// The job starts immediately if the concurrency ceiling has room,
    /// otherwise it queues FIFO. Invalid transcripts are rejected here,
    /// before a job is created.
    pub async fn submit(&self, transcript: Transcript, params: JobParams) -> Result<String> {
        transcript.check_invariants()?;

        let id = self.inner.ids.next_id();
        let now = self.inner.clock.now();

        let entry = JobEntry {
            record: JobRecord {
                id: id.clone(),
                params,
                transcript: Arc::new(transcript),
                state: JobState::Queued,
                stage: None,
                cache_hit: false,
                artifacts: None,
                error: None,
                submitted_at: now,
                started_at: None,
                finished_at: None,
            },
            progress: Arc::new(AtomicU8::new(0)),
            cancel: CancellationToken::new(),
            events: events::channel(),
        };

        self.inner.jobs.write().await.insert(id.clone(), entry);

        let admitted = {
            let mut adm = self.inner.admission.lock().expect("admission lock");
            if adm.running < self.inner.max_concurrent() {
                adm.running += 1;
                true
            } else {
                adm.queue.push_back(id.clone());
                false
            }
        };

        if admitted {
            if self.inner.mark_started(&id).await {
                info!("Job {} admitted immediately", id);
                Inner::spawn(self.inner.clone(), id.clone());
            } else {
                // Canceled between insert and admission; give the slot back.
                self.inner.release_slot().await;
                self.inner.try_admit().await;
            }
        } else {
            info!("Job {} queued (ceiling saturated)", id);
        }

        Ok(id)
    }

    /// Snapshot a job's status.
    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.snapshot())
    }

    /// Snapshot all jobs, newest first.
    pub async fn list(&self) -> Vec<JobStatus> {
        let jobs = self.inner.jobs.read().await;
        let mut statuses: Vec<JobStatus> = jobs.values().map(|e| e.snapshot()).collect();
        statuses.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(a.id.cmp(&b.id)));
        statuses
    }

    /// Look up a job's result. `None` means the id is unknown.
    pub async fn result(&self, job_id: &str) -> Option<JobResult> {
        let jobs = self.inner.jobs.read().await;
        let entry = jobs.get(job_id)?;
        Some(match entry.record.state {
            JobState::Queued | JobState::Running => JobResult::Pending,
            JobState::Succeeded => JobResult::Succeeded(
                entry
                    .record
                    .artifacts
                    .clone()
                    .unwrap_or_else(|| Arc::new(ArtifactSet::new())),
            ),
            JobState::Failed => JobResult::Failed(entry.record.error.clone().unwrap_or(JobError {
                kind: crate::error::ErrorKind::Internal,
                stage: Stage::Ingest,
                message: "unknown failure".to_string(),
            })),
            JobState::Canceled => JobResult::Canceled,
        })
    }

    /// Subscribe to a job's progress events.
    pub async fn subscribe(&self, job_id: &str) -> Option<broadcast::Receiver<JobEvent>> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.events.subscribe())
    }

    /// Wait for a job to reach a terminal state and return its result.
    pub async fn wait(&self, job_id: &str) -> Option<JobResult> {
        let mut rx = self.subscribe(job_id).await?;
        loop {
            match self.result(job_id).await? {
                JobResult::Pending => {}
                terminal => return Some(terminal),
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.result(job_id).await,
            }
        }
    }

    /// Request cancellation. Best effort: a queued job is canceled
    /// immediately; a running job stops at its next cancellation point.
    /// Returns false for unknown or already-terminal jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        // Pull the job out of the admission queue first so it cannot be
        // admitted while we mark it canceled.
        {
            let mut adm = self.inner.admission.lock().expect("admission lock");
            adm.queue.retain(|id| id != job_id);
        }

        let mut jobs = self.inner.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };

        match entry.record.state {
            JobState::Queued => {
                entry.cancel.cancel();
                entry.record.state = JobState::Canceled;
                entry.record.finished_at = Some(self.inner.clock.now());
                let _ = entry.events.send(JobEvent {
                    job_id: job_id.to_string(),
                    state: JobState::Canceled,
                    stage: None,
                    pct: entry.progress.load(Ordering::SeqCst),
                    message: "canceled before admission".to_string(),
                });
                info!("Job {} canceled while queued", job_id);
                true
            }
            JobState::Running => {
                entry.cancel.cancel();
                info!("Job {} cancellation requested", job_id);
                true
            }
            _ => false,
        }
    }
}

impl JobEntry {
    fn snapshot(&self) -> JobStatus {
        JobStatus {
            id: self.record.id.clone(),
            state: self.record.state,
            stage: self.record.stage,
            progress_pct: self.progress.load(Ordering::SeqCst),
            cache_hit: self.record.cache_hit,
            error: self.record.error.clone(),
            submitted_at: self.record.submitted_at,
            started_at: self.record.started_at,
            finished_at: self.record.finished_at,
        }
    }
}

impl Inner {
    fn max_concurrent(&self) -> usize {
        self.settings.pipeline.max_concurrent_jobs.max(1)
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.settings.cache.ttl_hours * 3600)
    }

    /// Spawn the run task for an admitted job. Panics inside a stage are
    /// contained and surfaced as `INTERNAL`; they never take down the
    /// scheduler or other jobs.
    fn spawn(inner: Arc<Inner>, job_id: String) {
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(inner.run_job(&job_id)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!("Job {} panicked inside a stage", job_id);
                    Err(OppsumError::Internal("stage panicked".to_string()))
                }
            };
            inner.finish_job(&job_id, outcome).await;
            inner.release_slot().await;
            inner.try_admit().await;
        });
    }

    /// Drive one job through the pipeline. Cancellation is checked at every
    /// stage boundary; the map stage adds per-chunk checks of its own.
    #[instrument(skip(self), fields(job = %job_id))]
    async fn run_job(&self, job_id: &str) -> Result<Arc<ArtifactSet>> {
        let ctx = self.job_context(job_id).await?;

        // INGEST: fingerprint, cache lookup, chunking.
        self.begin_stage(job_id, Stage::Ingest, PCT_INGEST, "ingesting transcript")
            .await;
        if ctx.cancel.is_cancelled() {
            return Err(OppsumError::Canceled);
        }

        let fingerprint = Fingerprint::compute(&ctx.transcript.content_hash(), &ctx.params);
        if let Some(artifacts) = self.cache.get(&fingerprint).await? {
            info!("Job {} served from cache ({})", job_id, fingerprint);
            self.mark_cache_hit(job_id).await;
            return Ok(artifacts);
        }

        let chunks = chunking::chunk(&ctx.transcript, ctx.params.token_budget)?;
        info!("Job {} chunked into {} slices", job_id, chunks.len());

        // MAP: per-chunk calls with bounded parallelism, recombined by index.
        self.begin_stage(
            job_id,
            Stage::Map,
            PCT_MAP_START,
            &format!("mapping {} chunks", chunks.len()),
        )
        .await;
        if ctx.cancel.is_cancelled() {
            return Err(OppsumError::Canceled);
        }

        let map_progress = {
            let job_id = job_id.to_string();
            let events = ctx.events.clone();
            let progress = ctx.progress.clone();
            move |done: usize, total: usize| {
                let pct = PCT_MAP_START + ((done * MAP_SPAN as usize) / total.max(1)) as u8;
                progress.store(pct, Ordering::SeqCst);
                let _ = events.send(JobEvent {
                    job_id: job_id.clone(),
                    state: JobState::Running,
                    stage: Some(Stage::Map),
                    pct,
                    message: format!("mapped {}/{} chunks", done, total),
                });
            }
        };

        let map_results = self
            .map_stage
            .map_all(&chunks, &ctx.params, &ctx.cancel, &map_progress)
            .await?;

        // REDUCE: one higher-tier call over the merged bullets.
        self.begin_stage(job_id, Stage::Reduce, PCT_REDUCE, "reducing partials")
            .await;
        if ctx.cancel.is_cancelled() {
            return Err(OppsumError::Canceled);
        }

        let reduced = self
            .reduce_stage
            .reduce(&map_results, ctx.transcript.duration_ms, &ctx.params, &ctx.cancel)
            .await?;

        // VALIDATE: score coverage and evidence overlap; at most one
        // corrective reduce.
        self.begin_stage(job_id, Stage::Validate, PCT_VALIDATE, "validating summary")
            .await;
        if ctx.cancel.is_cancelled() {
            return Err(OppsumError::Canceled);
        }

        let verdict = self.validator.validate(&reduced, &ctx.transcript);
        let reduced = if verdict.passed {
            reduced
        } else {
            warn!(
                "Job {} failed validation (coverage {:.2}, overlap {:.2}); running corrective reduce",
                job_id, verdict.coverage_pct, verdict.overlap_score
            );
            let corrected = self
                .reduce_stage
                .reduce_corrective(
                    &map_results,
                    ctx.transcript.duration_ms,
                    &ctx.params,
                    &ctx.cancel,
                    &verdict.reasons.join("; "),
                )
                .await?;

            let second = self.validator.validate(&corrected, &ctx.transcript);
            if !second.passed {
                return Err(OppsumError::LlmValidation(format!(
                    "summary failed validation after corrective pass: {}",
                    second.reasons.join("; ")
                )));
            }
            corrected
        };

        // FINALIZE: assemble artifacts and persist. A canceled job must not
        // write under a successful fingerprint.
        self.begin_stage(job_id, Stage::Finalize, PCT_FINALIZE, "persisting artifacts")
            .await;
        if ctx.cancel.is_cancelled() {
            return Err(OppsumError::Canceled);
        }

        let mut set = ArtifactSet::new();
        set.push(Artifact::from_value(artifact::TRANSCRIPT, ctx.transcript.as_ref())?);
        set.push(Artifact::from_value(artifact::CHUNKS, &chunks)?);
        set.push(Artifact::from_value(artifact::MAP_PARTIALS, &map_results)?);
        set.push(Artifact::from_value(artifact::REDUCED_SUMMARY, &reduced)?);
        let artifacts = Arc::new(set);

        self.cache
            .put(&fingerprint, artifacts.clone(), self.cache_ttl())
            .await?;

        Ok(artifacts)
    }

    async fn job_context(&self, job_id: &str) -> Result<JobCtx> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| OppsumError::Internal(format!("unknown job {}", job_id)))?;
        Ok(JobCtx {
            transcript: entry.record.transcript.clone(),
            params: entry.record.params.clone(),
            cancel: entry.cancel.clone(),
            events: entry.events.clone(),
            progress: entry.progress.clone(),
        })
    }

    async fn begin_stage(&self, job_id: &str, stage: Stage, pct: u8, message: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.record.stage = Some(stage);
            entry.progress.store(pct, Ordering::SeqCst);
            let _ = entry.events.send(JobEvent {
                job_id: job_id.to_string(),
                state: JobState::Running,
                stage: Some(stage),
                pct,
                message: message.to_string(),
            });
        }
    }

    async fn mark_cache_hit(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.record.cache_hit = true;
            let _ = entry.events.send(JobEvent {
                job_id: job_id.to_string(),
                state: JobState::Running,
                stage: Some(Stage::Ingest),
                pct: PCT_FINALIZE,
                message: "cache hit; skipping pipeline".to_string(),
            });
        }
    }

    /// Transition Queued -> Running. Returns false when the job is gone or
    /// was canceled while waiting; the caller must give its slot back.
    async fn mark_started(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if entry.record.state != JobState::Queued {
            return false;
        }
        entry.record.state = JobState::Running;
        entry.record.started_at = Some(self.clock.now());
        true
    }

    /// Write the terminal state. The single-writer discipline lives here:
    /// this is the only place a running job's state and outcome change.
    async fn finish_job(&self, job_id: &str, outcome: Result<Arc<ArtifactSet>>) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.record.state.is_terminal() {
            return;
        }

        entry.record.finished_at = Some(self.clock.now());

        match outcome {
            Ok(artifacts) => {
                entry.record.state = JobState::Succeeded;
                entry.record.artifacts = Some(artifacts);
                entry.progress.store(100, Ordering::SeqCst);
                let _ = entry.events.send(JobEvent {
                    job_id: job_id.to_string(),
                    state: JobState::Succeeded,
                    stage: entry.record.stage,
                    pct: 100,
                    message: "completed".to_string(),
                });
                info!("Job {} succeeded", job_id);
            }
            Err(OppsumError::Canceled) => {
                entry.record.state = JobState::Canceled;
                let _ = entry.events.send(JobEvent {
                    job_id: job_id.to_string(),
                    state: JobState::Canceled,
                    stage: entry.record.stage,
                    pct: entry.progress.load(Ordering::SeqCst),
                    message: "canceled".to_string(),
                });
                info!("Job {} canceled", job_id);
            }
            Err(e) => {
                let stage = entry.record.stage.unwrap_or(Stage::Ingest);
                error!("Job {} failed at {}: {}", job_id, stage, e);
                entry.record.state = JobState::Failed;
                entry.record.error = Some(JobError {
                    kind: e.kind(),
                    stage,
                    message: e.to_string(),
                });
                let _ = entry.events.send(JobEvent {
                    job_id: job_id.to_string(),
                    state: JobState::Failed,
                    stage: Some(stage),
                    pct: entry.progress.load(Ordering::SeqCst),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn release_slot(&self) {
        let mut adm = self.admission.lock().expect("admission lock");
        adm.running = adm.running.saturating_sub(1);
    }

    /// Admit queued jobs while there is capacity, skipping entries that were
    /// canceled while waiting.
    async fn try_admit(self: &Arc<Self>) {
        loop {
            let candidate = {
                let mut adm = self.admission.lock().expect("admission lock");
                if adm.running >= self.max_concurrent() {
                    return;
                }
                match adm.queue.pop_front() {
                    Some(id) => {
                        adm.running += 1;
                        id
                    }
                    None => return,
                }
            };

            if self.mark_started(&candidate).await {
                info!("Job {} admitted from queue", candidate);
                Inner::spawn(self.clone(), candidate);
                return;
            }

            // Canceled while queued; release the slot and look again.
            self.release_slot().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::ErrorKind;
    use crate::llm::{LlmClient, LlmRequest};
    use crate::transcript::TranscriptSegment;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    const MAP_MODEL: &str = "map-tier";
    const REDUCE_MODEL: &str = "reduce-tier";

    fn test_settings(max_jobs: usize) -> Settings {
        let mut s = Settings::default();
        s.pipeline.max_concurrent_jobs = max_jobs;
        s.pipeline.map_parallelism = 2;
        s.map.model = MAP_MODEL.to_string();
        s.reduce.model = REDUCE_MODEL.to_string();
        s.llm.backoff_base_ms = 1;
        s.validation.coverage_min = 0.0;
        s.validation.overlap_min = 0.0;
        s
    }

    fn transcript(tag: &str) -> Transcript {
        Transcript::new(
            tag,
            vec![
                TranscriptSegment::new(0, 30_000, format!("first part about {}", tag)),
                TranscriptSegment::new(30_000, 60_000, format!("second part about {}", tag)),
            ],
        )
    }

    fn map_payload() -> String {
        r#"{"bullets": [{"timestamp_ms": 15000, "text": "a mapped point"}]}"#.to_string()
    }

    fn spread_reduce_payload() -> String {
        r#"{
            "summary": [{"timestamp_ms": 1000, "text": "s"}],
            "key_ideas": [{"timestamp_ms": 35000, "text": "k"}],
            "takeaways": [{"timestamp_ms": 55000, "text": "t"}]
        }"#
        .to_string()
    }

    fn clustered_reduce_payload() -> String {
        r#"{
            "summary": [{"timestamp_ms": 1000, "text": "s"}],
            "key_ideas": [{"timestamp_ms": 1500, "text": "k"}],
            "takeaways": [{"timestamp_ms": 2000, "text": "t"}]
        }"#
        .to_string()
    }

    /// LLM double gated on a semaphore, with per-stage payloads and counters.
    struct GateLlm {
        gate: Semaphore,
        map_response: String,
        reduce_response: String,
        map_calls: AtomicUsize,
        reduce_calls: AtomicUsize,
    }

    impl GateLlm {
        fn open() -> Arc<Self> {
            Arc::new(Self::build(100_000, map_payload(), spread_reduce_payload()))
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self::build(0, map_payload(), spread_reduce_payload()))
        }

        fn with_responses(map: String, reduce: String) -> Arc<Self> {
            Arc::new(Self::build(100_000, map, reduce))
        }

        fn build(permits: usize, map_response: String, reduce_response: String) -> Self {
            Self {
                gate: Semaphore::new(permits),
                map_response,
                reduce_response,
                map_calls: AtomicUsize::new(0),
                reduce_calls: AtomicUsize::new(0),
            }
        }

        fn release_all(&self) {
            self.gate.add_permits(100_000);
        }

        fn total_calls(&self) -> usize {
            self.map_calls.load(Ordering::SeqCst) + self.reduce_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for GateLlm {
        async fn generate(&self, request: &LlmRequest) -> Result<String> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| OppsumError::Internal("gate closed".to_string()))?;
            permit.forget();

            if request.model == MAP_MODEL {
                self.map_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.map_response.clone())
            } else {
                self.reduce_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.reduce_response.clone())
            }
        }
    }

    fn build_scheduler(
        settings: &Settings,
        llm: Arc<GateLlm>,
        cache: Arc<dyn ArtifactCache>,
    ) -> Scheduler {
        Scheduler::new(settings.clone(), Prompts::default(), llm, cache)
    }

    async fn wait_terminal(s: &Scheduler, id: &str) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let st = s.status(id).await.expect("job exists");
                if st.state.is_terminal() {
                    return st;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach a terminal state in time")
    }

    #[tokio::test]
    async fn test_single_job_succeeds_with_artifacts() {
        let llm = GateLlm::open();
        let settings = test_settings(2);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let id = s
            .submit(transcript("talk"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let st = wait_terminal(&s, &id).await;

        assert_eq!(st.state, JobState::Succeeded);
        assert_eq!(st.progress_pct, 100);
        assert!(!st.cache_hit);

        let JobResult::Succeeded(artifacts) = s.result(&id).await.unwrap() else {
            panic!("expected success");
        };
        for name in [
            artifact::TRANSCRIPT,
            artifact::CHUNKS,
            artifact::MAP_PARTIALS,
            artifact::REDUCED_SUMMARY,
        ] {
            assert!(artifacts.get(name).is_some(), "missing artifact {}", name);
        }
    }

    #[tokio::test]
    async fn test_invalid_transcript_rejected_at_submit() {
        let llm = GateLlm::open();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm, Arc::new(MemoryCache::new()));

        let err = s
            .submit(Transcript::new("x", vec![]), JobParams::from_settings(&settings))
            .await
            .unwrap_err();
        assert!(matches!(err, OppsumError::InvalidInput(_)));
        assert!(s.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_holds_exactly() {
        let llm = GateLlm::closed();
        let settings = test_settings(3);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let mut ids = Vec::new();
        for i in 0..5 {
            let id = s
                .submit(
                    transcript(&format!("job{}", i)),
                    JobParams::from_settings(&settings),
                )
                .await
                .unwrap();
            ids.push(id);
        }

        tokio::time::sleep(Duration::from_millis(30)).await;

        let statuses = s.list().await;
        let running = statuses.iter().filter(|j| j.state == JobState::Running).count();
        let queued = statuses.iter().filter(|j| j.state == JobState::Queued).count();
        assert_eq!(running, 3);
        assert_eq!(queued, 2);

        llm.release_all();
        for id in &ids {
            assert_eq!(wait_terminal(&s, id).await.state, JobState::Succeeded);
        }
    }

    #[tokio::test]
    async fn test_queued_job_admitted_after_completion() {
        let llm = GateLlm::closed();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let a = s
            .submit(transcript("a"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let b = s
            .submit(transcript("b"), JobParams::from_settings(&settings))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(s.status(&a).await.unwrap().state, JobState::Running);
        assert_eq!(s.status(&b).await.unwrap().state, JobState::Queued);

        llm.release_all();
        assert_eq!(wait_terminal(&s, &a).await.state, JobState::Succeeded);
        assert_eq!(wait_terminal(&s, &b).await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_pipeline() {
        let llm = GateLlm::open();
        let settings = test_settings(2);
        let cache = Arc::new(MemoryCache::new());
        let s = build_scheduler(&settings, llm.clone(), cache);
        let params = JobParams::from_settings(&settings);

        let first = s.submit(transcript("same"), params.clone()).await.unwrap();
        assert_eq!(wait_terminal(&s, &first).await.state, JobState::Succeeded);
        let calls_after_first = llm.total_calls();

        let second = s.submit(transcript("same"), params.clone()).await.unwrap();
        let st = wait_terminal(&s, &second).await;
        assert_eq!(st.state, JobState::Succeeded);
        assert!(st.cache_hit);
        assert_eq!(llm.total_calls(), calls_after_first);

        let JobResult::Succeeded(a1) = s.result(&first).await.unwrap() else {
            panic!()
        };
        let JobResult::Succeeded(a2) = s.result(&second).await.unwrap() else {
            panic!()
        };
        assert_eq!(
            a1.get(artifact::REDUCED_SUMMARY).unwrap().content_hash,
            a2.get(artifact::REDUCED_SUMMARY).unwrap().content_hash
        );
    }

    #[tokio::test]
    async fn test_prompt_version_bump_bypasses_cache() {
        let llm = GateLlm::open();
        let settings = test_settings(2);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));
        let params = JobParams::from_settings(&settings);

        let first = s.submit(transcript("same"), params.clone()).await.unwrap();
        wait_terminal(&s, &first).await;
        let calls_after_first = llm.total_calls();

        let mut bumped = params;
        bumped.prompt_version = "v2".to_string();
        let second = s.submit(transcript("same"), bumped).await.unwrap();
        let st = wait_terminal(&s, &second).await;
        assert_eq!(st.state, JobState::Succeeded);
        assert!(!st.cache_hit);
        assert!(llm.total_calls() > calls_after_first);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_immediate() {
        let llm = GateLlm::closed();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let a = s
            .submit(transcript("a"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let b = s
            .submit(transcript("b"), JobParams::from_settings(&settings))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(s.cancel(&b).await);

        let st = s.status(&b).await.unwrap();
        assert_eq!(st.state, JobState::Canceled);
        assert!(st.stage.is_none());
        assert!(st.started_at.is_none());

        // Canceling again is a no-op.
        assert!(!s.cancel(&b).await);

        llm.release_all();
        assert_eq!(wait_terminal(&s, &a).await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_running_job_never_writes_cache() {
        let llm = GateLlm::closed();
        let settings = test_settings(1);
        let cache = Arc::new(MemoryCache::new());
        let s = build_scheduler(&settings, llm.clone(), cache.clone());

        let id = s
            .submit(transcript("a"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.status(&id).await.unwrap().state, JobState::Running);

        assert!(s.cancel(&id).await);
        // Let the in-flight call complete; its result is discarded.
        llm.release_all();

        let st = wait_terminal(&s, &id).await;
        assert_eq!(st.state, JobState::Canceled);
        assert_eq!(cache.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_triggers_exactly_one_corrective_reduce() {
        // Clustered bullets cover 1 of 2 buckets (60s / 30s buckets) and the
        // corrective pass repeats the same payload, so the job must fail.
        let llm = GateLlm::with_responses(map_payload(), clustered_reduce_payload());
        let mut settings = test_settings(1);
        settings.validation.coverage_min = 0.9;
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let id = s
            .submit(transcript("v"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let st = wait_terminal(&s, &id).await;

        assert_eq!(st.state, JobState::Failed);
        let err = st.error.expect("failure details");
        assert_eq!(err.kind, ErrorKind::LlmValidationFail);
        assert_eq!(err.stage, Stage::Validate);
        // Initial reduce plus exactly one corrective call.
        assert_eq!(llm.reduce_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_map_schema_failure_is_terminal_validation_fail() {
        let llm = GateLlm::with_responses("not json".to_string(), spread_reduce_payload());
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let id = s
            .submit(transcript("m"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let st = wait_terminal(&s, &id).await;

        assert_eq!(st.state, JobState::Failed);
        let err = st.error.expect("failure details");
        assert_eq!(err.kind, ErrorKind::LlmValidationFail);
        assert_eq!(err.stage, Stage::Map);
        // One attempt plus max_schema_retries correction attempts.
        assert_eq!(
            llm.map_calls.load(Ordering::SeqCst) as u32,
            settings.map.max_schema_retries + 1
        );
        assert_eq!(llm.reduce_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_event_stream_is_ordered_and_terminates() {
        let llm = GateLlm::closed();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm.clone(), Arc::new(MemoryCache::new()));

        let id = s
            .submit(transcript("e"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let mut rx = s.subscribe(&id).await.unwrap();
        llm.release_all();

        let mut last_pct = 0u8;
        let mut terminal = None;
        while terminal.is_none() {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event stream stalled")
                .expect("channel open");
            assert!(event.pct >= last_pct, "progress went backwards");
            last_pct = event.pct;
            if event.is_terminal() {
                terminal = Some(event);
            }
        }

        let terminal = terminal.unwrap();
        assert_eq!(terminal.state, JobState::Succeeded);
        assert_eq!(terminal.pct, 100);
    }

    #[tokio::test]
    async fn test_wait_returns_result() {
        let llm = GateLlm::open();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm, Arc::new(MemoryCache::new()));

        let id = s
            .submit(transcript("w"), JobParams::from_settings(&settings))
            .await
            .unwrap();
        let result = s.wait(&id).await.unwrap();
        assert!(matches!(result, JobResult::Succeeded(_)));
    }

    #[tokio::test]
    async fn test_unknown_job_id() {
        let llm = GateLlm::open();
        let settings = test_settings(1);
        let s = build_scheduler(&settings, llm, Arc::new(MemoryCache::new()));

        assert!(s.status("nope").await.is_none());
        assert!(s.result("nope").await.is_none());
        assert!(!s.cancel("nope").await);
    }
}
