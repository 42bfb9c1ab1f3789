use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// Classifies a stage failure for retry decisions.
///
/// Transient and auth failures are worth re-running a stage for; the rest
/// terminate the job on first sight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Network blip or temporary remote unavailability (timeout, reset, 5xx).
    Transient(String),
    /// The remote rejected our credentials (401/403/419).
    Auth(String),
    /// Non-retryable remote rejection, e.g. an invalid payload.
    Rejected(String),
    /// The input sheet could not be parsed.
    Parse(String),
    /// Local persistence failed.
    Io(String),
    /// The run was aborted while this job was in flight.
    Cancelled,
}

impl FailureKind {
    /// Whether re-running the stage can plausibly change the result.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient(_) | FailureKind::Auth(_))
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient(msg) => write!(f, "transient error: {msg}"),
            FailureKind::Auth(msg) => write!(f, "authorization rejected: {msg}"),
            FailureKind::Rejected(msg) => write!(f, "rejected: {msg}"),
            FailureKind::Parse(msg) => write!(f, "parse error: {msg}"),
            FailureKind::Io(msg) => write!(f, "io error: {msg}"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The result of executing one attempt of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure(FailureKind),
}

/// A job's final, immutable outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded { artifact: PathBuf },
    Failed { stage: Stage, reason: FailureKind },
    Cancelled { stage: Stage },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

/// Configuration for per-stage retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed per network-calling stage before the job fails.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Ceiling on a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Backoff delay after the given attempt number (1-based):
    /// base_delay_ms * 2^(attempt - 1), capped at max_delay_ms.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms)
    }
}

/// One unit of work: a single spec sheet driven through the build pipeline.
///
/// A job is owned and mutated by its driving task only; nothing else writes
/// to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique within a run, derived from the sheet file name.
    pub id: String,
    /// The sheet this job processes.
    pub source: PathBuf,
    pub stage: Stage,
    pub stage_history: Vec<Stage>,
    /// Attempts spent in the current stage, reset on stage entry.
    pub attempts: u32,
    /// Whether the single free re-authentication has been used in the
    /// current stage.
    pub auth_retried: bool,
    pub last_error: Option<String>,
    pub retry: RetryConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String, source: PathBuf, retry: RetryConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            stage: Stage::Queued,
            stage_history: Vec::new(),
            attempts: 0,
            auth_retried: false,
            last_error: None,
            retry,
            created_at: now,
            updated_at: now,
        }
    }

    /// Start a new attempt of the current stage, returning its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.touch();
        self.attempts
    }

    /// Move the job into `stage`, recording history and resetting the
    /// per-stage counters.
    pub(super) fn enter(&mut self, stage: Stage) {
        self.stage_history.push(self.stage);
        self.stage = stage;
        self.attempts = 0;
        self.auth_retried = false;
        self.touch();
    }

    pub(super) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Terminal record for one job, kept by the result aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub outcome: JobOutcome,
    pub stages_visited: Vec<Stage>,
    /// Attempts spent in the stage the job ended in.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobRecord {
    /// Build the terminal record from a finished job.
    pub fn from_job(job: &Job, outcome: JobOutcome) -> Self {
        let now = Utc::now();
        let duration = now - job.created_at;
        let mut visited = job.stage_history.clone();
        visited.push(job.stage);

        Self {
            job_id: job.id.clone(),
            outcome,
            stages_visited: visited,
            attempts: job.attempts,
            started_at: job.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
