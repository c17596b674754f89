//! Per-job progress events.
//!
//! The scheduler writes ordered `{stage, pct, message}` events to a broadcast
//! channel per job; any number of observers subscribe. Transport (SSE,
//! polling) is an adapter over this channel, not a concern of the core.

use super::{JobState, Stage};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of each job's event channel. A slow observer that falls further
/// behind than this sees a `Lagged` error, never blocks the scheduler.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A single progress event. The stream per job is ordered and terminates
/// with an event whose `state` is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub pct: u8,
    pub message: String,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Create a fresh event channel for one job.
pub(crate) fn channel() -> broadcast::Sender<JobEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_event_detection() {
        let running = JobEvent {
            job_id: "j".into(),
            state: JobState::Running,
            stage: Some(Stage::Map),
            pct: 40,
            message: "mapping".into(),
        };
        assert!(!running.is_terminal());

        let done = JobEvent {
            job_id: "j".into(),
            state: JobState::Succeeded,
            stage: None,
            pct: 100,
            message: "completed".into(),
        };
        assert!(done.is_terminal());
    }
}
