//! Core types for a coordination episode

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Stable handle of a job within one process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a single job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
}

impl JobState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobState::Pending,
            1 => JobState::Running,
            _ => JobState::Completed,
        }
    }
}

/// Lifecycle of a coordination episode
///
/// `Draining` loops on itself until the pending set is empty. `Failed` is
/// only reachable from `Finalizing`; job failures never fail the episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeState {
    NotStarted,
    Draining,
    Finalizing,
    Done,
    Failed,
}

/// A job finishing, as seen by observers
#[derive(Clone, Debug)]
pub struct CompletionEvent {
    pub job: JobId,
    pub name: String,
    /// `None` on success, the failure text otherwise
    pub error: Option<String>,
    /// When the job completed, on the tokio clock
    pub completed_at: tokio::time::Instant,
    /// Time from episode start to the job's completion
    pub elapsed: Duration,
    /// Pending jobs left after this one was removed
    pub remaining: usize,
}

impl CompletionEvent {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One line of the episode report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub job: JobId,
    pub name: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl From<&CompletionEvent> for CompletionRecord {
    fn from(event: &CompletionEvent) -> Self {
        Self {
            job: event.job,
            name: event.name.clone(),
            succeeded: event.succeeded(),
            error: event.error.clone(),
            elapsed_ms: event.elapsed.as_millis() as u64,
        }
    }
}

/// Summary of a finished episode, in completion order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub run_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// State the episode ended in
    pub state: EpisodeState,
    pub completions: Vec<CompletionRecord>,
}

impl EpisodeReport {
    pub fn failed_jobs(&self) -> impl Iterator<Item = &CompletionRecord> {
        self.completions.iter().filter(|r| !r.succeeded)
    }

    /// Job names in the order they completed
    pub fn completion_order(&self) -> Vec<&str> {
        self.completions.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What `Coordinator::run` hands back on success
#[derive(Debug)]
pub struct EpisodeOutput<R> {
    /// Value produced by the final step
    pub value: R,
    pub report: EpisodeReport,
}
