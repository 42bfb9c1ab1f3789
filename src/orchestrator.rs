//! Drives a full run: admits jobs under the concurrency limiter, walks each
//! one through the stage machine with retry, publishes progress, and
//! aggregates terminal outcomes.
//!
//! Jobs interleave arbitrarily; within one job the stages run strictly in
//! sequence. The credential manager's single-flight refresh and the limiter
//! are the only cross-job synchronization points.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{AuthEndpoint, CredentialManager};
use crate::config::AtbConfig;
use crate::limiter::JobLimiter;
use crate::remote::{BuildService, BuildStatus, RemoteError, SpecPayload, SubmissionHandle};
use crate::report::{fmt_duration, RunReport, RunSummary};
use crate::sink;
use crate::source::{self, SpecSheet};
use crate::state_machine::{
    FailureKind, Job, JobOutcome, JobRecord, Stage, StageOutcome, StateMachine, Transition,
};
use crate::ui::ProgressBoard;

/// Stage-internal failure routing. Soft failures are fed to the state
/// machine's retry budget; a failed re-authentication ends the job at
/// AUTHENTICATING no matter which stage tripped it.
enum JobError {
    Soft(FailureKind),
    ReauthFailed(String),
}

/// Everything a job needs besides its own state.
pub struct Orchestrator<B, A> {
    build: Arc<B>,
    creds: Arc<CredentialManager<A>>,
    limiter: Arc<JobLimiter>,
    board: Arc<ProgressBoard>,
    config: AtbConfig,
    vms: Vec<String>,
    cancel: CancellationToken,
}

impl<B, A> Orchestrator<B, A>
where
    B: BuildService + 'static,
    A: AuthEndpoint + 'static,
{
    pub fn new(
        build: Arc<B>,
        creds: Arc<CredentialManager<A>>,
        limiter: Arc<JobLimiter>,
        board: Arc<ProgressBoard>,
        config: AtbConfig,
        vms: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            build,
            creds,
            limiter,
            board,
            config,
            vms,
            cancel,
        }
    }

    /// Run every sheet to a terminal outcome and return the sealed summary.
    ///
    /// One task per sheet; no job error escapes its task, so one job's
    /// failure never takes down another.
    pub async fn run(self: Arc<Self>, sheets: Vec<SpecSheet>) -> RunSummary {
        info!(
            jobs = sheets.len(),
            concurrency = self.limiter.capacity(),
            "starting run"
        );
        let report = Arc::new(RunReport::new(sheets.len()));

        // Warm-up: acquire the first token before admitting jobs. Not fatal
        // on failure; each job re-requests a token on admission, and the
        // single-flight manager collapses the stampede either way.
        if let Err(err) = self.creds.token().await {
            warn!(%err, "initial authentication failed; jobs will retry on admission");
        }

        let mut tasks = JoinSet::new();
        for sheet in sheets {
            self.board.register(&sheet.id);
            let this = Arc::clone(&self);
            let report = Arc::clone(&report);
            tasks.spawn(async move {
                let record = this.run_job(sheet).await;
                report.record(record);
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%err, "job task aborted");
            }
        }

        Arc::into_inner(report)
            .expect("all job tasks have drained")
            .finalize()
    }

    /// Drive one sheet to its terminal outcome. The limiter slot is held for
    /// the job's whole active lifetime and released exactly once, when this
    /// function returns.
    async fn run_job(&self, sheet: SpecSheet) -> JobRecord {
        let mut job = Job::new(sheet.id, sheet.path, self.config.retry());

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                return self.finish(&job, JobOutcome::Cancelled { stage: job.stage });
            }
            permit = self.limiter.acquire() => permit,
        };

        // Slot acquired: QUEUED → AUTHENTICATING.
        StateMachine::next(&mut job, StageOutcome::Success);
        self.drive(&mut job).await
    }

    async fn drive(&self, job: &mut Job) -> JobRecord {
        let mut payload: Option<SpecPayload> = None;
        let mut handle: Option<SubmissionHandle> = None;
        let mut artifact: Option<PathBuf> = None;

        loop {
            job.begin_attempt();
            self.board.update(&job.id, job.stage, job.attempts);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(JobError::Soft(FailureKind::Cancelled)),
                r = self.run_stage(
                    job.stage,
                    &job.id,
                    &job.source,
                    &mut job.auth_retried,
                    &mut payload,
                    &mut handle,
                    &mut artifact,
                ) => r,
            };

            match result {
                Ok(()) => {
                    if let Transition::Next(Stage::Succeeded) =
                        StateMachine::next(job, StageOutcome::Success)
                    {
                        let artifact =
                            artifact.take().expect("artifact persisted before terminal stage");
                        return self.finish(job, JobOutcome::Succeeded { artifact });
                    }
                }
                Err(JobError::ReauthFailed(message)) => {
                    return self.finish(
                        job,
                        JobOutcome::Failed {
                            stage: Stage::Authenticating,
                            reason: FailureKind::Auth(message),
                        },
                    );
                }
                Err(JobError::Soft(FailureKind::Cancelled)) => {
                    return self.finish(job, JobOutcome::Cancelled { stage: job.stage });
                }
                Err(JobError::Soft(kind)) => {
                    match StateMachine::next(job, StageOutcome::Failure(kind)) {
                        Transition::Retry {
                            stage,
                            attempt,
                            reason,
                        } => {
                            let delay = job.retry.delay_for_attempt(attempt);
                            warn!(
                                job = %job.id,
                                %stage,
                                attempt,
                                max = job.retry.max_attempts,
                                delay_ms = delay,
                                "stage failed, retrying"
                            );
                            self.board.retrying(
                                &job.id,
                                attempt,
                                job.retry.max_attempts,
                                &reason.to_string(),
                                delay,
                            );
                            tokio::select! {
                                _ = self.cancel.cancelled() => {
                                    return self.finish(
                                        job,
                                        JobOutcome::Cancelled { stage: job.stage },
                                    );
                                }
                                _ = sleep(Duration::from_millis(delay)) => {}
                            }
                        }
                        Transition::Fail { stage, reason } => {
                            return self.finish(job, JobOutcome::Failed { stage, reason });
                        }
                        Transition::Next(_) => {
                            unreachable!("a failure outcome never advances the stage")
                        }
                    }
                }
            }
        }
    }

    /// One attempt of the current stage.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        stage: Stage,
        job_id: &str,
        sheet: &Path,
        auth_retried: &mut bool,
        payload: &mut Option<SpecPayload>,
        handle: &mut Option<SubmissionHandle>,
        artifact: &mut Option<PathBuf>,
    ) -> Result<(), JobError> {
        match stage {
            Stage::Authenticating => {
                self.creds
                    .token()
                    .await
                    .map(|_| ())
                    .map_err(|e| JobError::Soft(FailureKind::Auth(e.to_string())))
            }

            Stage::Fetching => {
                // Field extraction happens once; retries of this stage reuse
                // the payload and only re-issue the submission.
                if payload.is_none() {
                    let path = sheet.to_path_buf();
                    let rows = tokio::task::spawn_blocking(move || source::read_rows(&path))
                        .await
                        .map_err(|e| JobError::Soft(FailureKind::Parse(e.to_string())))?
                        .map_err(|e| JobError::Soft(FailureKind::Parse(e.to_string())))?;
                    if rows.is_empty() {
                        return Err(JobError::Soft(FailureKind::Parse(
                            "no usable rows in sheet".to_string(),
                        )));
                    }
                    *payload = Some(SpecPayload {
                        single_spec_items: rows,
                        vms: self.vms.clone(),
                        ansa_dlfs: self.config.ansa_dlfs,
                    });
                }

                let p = payload.as_ref().expect("payload built above");
                let h = self
                    .call_remote(auth_retried, |token: String| async move {
                        self.build.submit_spec(&token, p).await
                    })
                    .await?;
                *handle = Some(h);
                Ok(())
            }

            Stage::Building => {
                let h = handle
                    .as_ref()
                    .expect("submission handle set in FETCHING")
                    .clone();
                let deadline = tokio::time::Instant::now()
                    + Duration::from_secs(self.config.poll_timeout_secs);
                loop {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(JobError::Soft(FailureKind::Transient(
                            "build polling timed out".to_string(),
                        )));
                    }
                    let h = &h;
                    let status = self
                        .call_remote(auth_retried, |token: String| async move {
                            self.build.poll_build(&token, h).await
                        })
                        .await?;
                    match status {
                        BuildStatus::Ready => return Ok(()),
                        BuildStatus::Failed { reason } => {
                            return Err(JobError::Soft(FailureKind::Rejected(reason)));
                        }
                        BuildStatus::Pending => {
                            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                        }
                    }
                }
            }

            Stage::Downloading => {
                let h = handle
                    .as_ref()
                    .expect("submission handle set in FETCHING")
                    .clone();
                let h = &h;
                let bytes = self
                    .call_remote(auth_retried, |token: String| async move {
                        self.build.download(&token, h).await
                    })
                    .await?;
                let path = sink::write_artifact(&self.config.output_dir, job_id, &bytes)
                    .await
                    .map_err(|e| JobError::Soft(FailureKind::Io(e.to_string())))?;
                *artifact = Some(path);
                Ok(())
            }

            // Queued is left before drive() starts and Succeeded ends it.
            Stage::Queued | Stage::Succeeded => Ok(()),
        }
    }

    /// Issue one remote call with a valid token.
    ///
    /// A credential rejection invalidates the used token (compare-and-swap,
    /// so a refresh won by another job survives) and re-authenticates once
    /// per stage without touching the retry budget. A second rejection, or a
    /// failed refresh, escalates.
    async fn call_remote<T, F, Fut>(&self, auth_retried: &mut bool, op: F) -> Result<T, JobError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>> + Send,
    {
        loop {
            let cred = self
                .creds
                .token()
                .await
                .map_err(|e| JobError::ReauthFailed(e.to_string()))?;

            match op(cred.token.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth() => {
                    self.creds.invalidate(&cred.token);
                    if !*auth_retried {
                        *auth_retried = true;
                        info!("credential rejected by build service; re-authenticating");
                        continue;
                    }
                    return Err(JobError::Soft(e.failure_kind()));
                }
                Err(e) => return Err(JobError::Soft(e.failure_kind())),
            }
        }
    }

    fn finish(&self, job: &Job, outcome: JobOutcome) -> JobRecord {
        let record = JobRecord::from_job(job, outcome);
        match &record.outcome {
            JobOutcome::Succeeded { artifact } => {
                let secs = record.duration_ms as f64 / 1000.0;
                self.board
                    .finish_success(&job.id, &format!("DONE ({})", fmt_duration(secs)));
                info!(job = %job.id, artifact = %artifact.display(), "job succeeded");
            }
            JobOutcome::Failed { stage, reason } => {
                self.board
                    .finish_failure(&job.id, &format!("FAILED at {stage}: {reason}"));
                error!(job = %job.id, %stage, %reason, "job failed");
            }
            JobOutcome::Cancelled { stage } => {
                self.board.finish_failure(&job.id, "CANCELLED");
                warn!(job = %job.id, %stage, "job cancelled");
            }
        }
        record
    }
}
