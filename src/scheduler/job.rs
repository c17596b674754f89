//! Job domain types.

use crate::artifact::ArtifactSet;
use crate::error::ErrorKind;
use crate::pipeline::JobParams;
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Map,
    Reduce,
    Validate,
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Map => "map",
            Stage::Reduce => "reduce",
            Stage::Validate => "validate",
            Stage::Finalize => "finalize",
        };
        write!(f, "{}", name)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }
}

/// Terminal failure details: one taxonomy code plus enough context to render
/// a specific message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

/// Externally visible snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub progress_pct: u8,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of a result lookup.
#[derive(Debug, Clone)]
pub enum JobResult {
    /// The job has not reached a terminal state yet.
    Pending,
    Succeeded(Arc<ArtifactSet>),
    Failed(JobError),
    Canceled,
}

/// Internal job record. Owned by the scheduler; stage executors never see it.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub id: String,
    pub params: JobParams,
    pub transcript: Arc<Transcript>,
    pub state: JobState,
    pub stage: Option<Stage>,
    pub cache_hit: bool,
    pub artifacts: Option<Arc<ArtifactSet>>,
    pub error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
