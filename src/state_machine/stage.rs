use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{FailureKind, Job, StageOutcome};

/// The stages a job moves through on its way to a build artifact.
///
/// Each job flows through: QUEUED → AUTHENTICATING → FETCHING → BUILDING →
/// DOWNLOADING → SUCCEEDED. A failure can terminate the job from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Queued,
    Authenticating,
    Fetching,
    Building,
    Downloading,
    Succeeded,
}

impl Stage {
    /// The stage that follows this one, or `None` from the terminal stage.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Authenticating),
            Stage::Authenticating => Some(Stage::Fetching),
            Stage::Fetching => Some(Stage::Building),
            Stage::Building => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Succeeded),
            Stage::Succeeded => None,
        }
    }

    /// Completion percentage shown on the progress board while a job sits
    /// in this stage.
    pub fn percent(self) -> u64 {
        match self {
            Stage::Queued => 0,
            Stage::Authenticating => 15,
            Stage::Fetching => 25,
            Stage::Building => 55,
            Stage::Downloading => 80,
            Stage::Succeeded => 100,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Succeeded
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Queued => write!(f, "QUEUED"),
            Stage::Authenticating => write!(f, "AUTHENTICATING"),
            Stage::Fetching => write!(f, "FETCHING"),
            Stage::Building => write!(f, "BUILDING"),
            Stage::Downloading => write!(f, "DOWNLOADING"),
            Stage::Succeeded => write!(f, "SUCCEEDED"),
        }
    }
}

/// The result of evaluating a stage outcome against the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next stage.
    Next(Stage),
    /// Re-run the current stage after a backoff delay.
    Retry {
        stage: Stage,
        attempt: u32,
        reason: FailureKind,
    },
    /// The job is finished with a terminal failure in `stage`.
    Fail { stage: Stage, reason: FailureKind },
}

/// Drives a [`Job`] through the stage sequence.
pub struct StateMachine;

impl StateMachine {
    /// Compute the next transition for the given job based on its current
    /// stage and the outcome of the attempt that just finished.
    ///
    /// - Success advances to the next stage and resets the per-stage attempt
    ///   counter.
    /// - A retryable failure re-runs the stage while attempts remain,
    ///   otherwise terminates the job.
    /// - A non-retryable failure terminates the job immediately.
    pub fn next(job: &mut Job, outcome: StageOutcome) -> Transition {
        let transition = match outcome {
            StageOutcome::Success => {
                let next = job
                    .stage
                    .next()
                    .expect("stage outcome reported for terminal stage");
                Transition::Next(next)
            }
            StageOutcome::Failure(kind) => Self::handle_failure(job, kind),
        };

        match &transition {
            Transition::Next(next) => {
                job.enter(*next);
            }
            Transition::Retry { reason, .. } => {
                job.last_error = Some(reason.to_string());
                job.touch();
            }
            Transition::Fail { reason, .. } => {
                job.last_error = Some(reason.to_string());
                job.touch();
            }
        }

        transition
    }

    fn handle_failure(job: &Job, kind: FailureKind) -> Transition {
        if kind.is_retryable() && job.attempts < job.retry.max_attempts {
            Transition::Retry {
                stage: job.stage,
                attempt: job.attempts,
                reason: kind,
            }
        } else {
            Transition::Fail {
                stage: job.stage,
                reason: kind,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::job::RetryConfig;
    use std::path::PathBuf;

    fn make_job(max_attempts: u32) -> Job {
        Job::new(
            "truck-42".into(),
            PathBuf::from("spec_bucket/truck-42.csv"),
            RetryConfig {
                max_attempts,
                ..Default::default()
            },
        )
    }

    #[test]
    fn happy_path_walks_all_stages() {
        let mut job = make_job(3);
        assert_eq!(job.stage, Stage::Queued);

        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Authenticating));

        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Fetching));

        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Building));

        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Downloading));

        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Succeeded));
        assert!(job.stage.is_terminal());
    }

    #[test]
    fn transient_failure_retries_then_fails() {
        let mut job = make_job(2);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(job.stage, Stage::Fetching);

        // First attempt fails: one attempt spent, budget of 2 allows a retry.
        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("connection reset".into())),
        );
        assert!(matches!(t, Transition::Retry { attempt: 1, .. }));
        assert_eq!(job.stage, Stage::Fetching);

        // Second attempt fails: budget exhausted.
        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("connection reset".into())),
        );
        assert_eq!(
            t,
            Transition::Fail {
                stage: Stage::Fetching,
                reason: FailureKind::Transient("connection reset".into()),
            }
        );
    }

    #[test]
    fn rejected_failure_is_terminal_without_retry() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(job.stage, Stage::Building);

        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Rejected("invalid payload".into())),
        );
        assert_eq!(
            t,
            Transition::Fail {
                stage: Stage::Building,
                reason: FailureKind::Rejected("invalid payload".into()),
            }
        );
        assert_eq!(job.attempts, 1, "no retries spent on a rejection");
    }

    #[test]
    fn parse_failure_is_terminal_without_retry() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Parse("bad header row".into())),
        );
        assert!(matches!(t, Transition::Fail { stage: Stage::Fetching, .. }));
    }

    #[test]
    fn retry_then_succeed_advances() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("timeout".into())),
        );
        assert!(matches!(t, Transition::Retry { .. }));

        job.begin_attempt();
        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(Stage::Building));
        assert_eq!(job.attempts, 0, "attempt counter resets on stage entry");
    }

    #[test]
    fn attempt_budget_is_per_stage() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        // Burn two attempts in Fetching, then succeed.
        job.begin_attempt();
        StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("timeout".into())),
        );
        job.begin_attempt();
        StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("timeout".into())),
        );
        job.begin_attempt();
        assert_eq!(job.attempts, 3);
        StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(job.stage, Stage::Building);

        // A fresh budget applies in Building.
        job.begin_attempt();
        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(FailureKind::Transient("503".into())),
        );
        assert!(matches!(t, Transition::Retry { attempt: 1, .. }));
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);

        job.begin_attempt();
        let t = StateMachine::next(&mut job, StageOutcome::Failure(FailureKind::Cancelled));
        assert_eq!(
            t,
            Transition::Fail {
                stage: Stage::Authenticating,
                reason: FailureKind::Cancelled,
            }
        );
    }

    #[test]
    fn stage_history_is_recorded() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        assert_eq!(
            job.stage_history,
            vec![Stage::Queued, Stage::Authenticating, Stage::Fetching]
        );
    }

    #[test]
    fn stage_display_and_order() {
        assert_eq!(Stage::Queued.to_string(), "QUEUED");
        assert_eq!(Stage::Authenticating.to_string(), "AUTHENTICATING");
        assert_eq!(Stage::Fetching.to_string(), "FETCHING");
        assert_eq!(Stage::Building.to_string(), "BUILDING");
        assert_eq!(Stage::Downloading.to_string(), "DOWNLOADING");
        assert_eq!(Stage::Succeeded.to_string(), "SUCCEEDED");

        assert_eq!(Stage::Queued.next(), Some(Stage::Authenticating));
        assert_eq!(Stage::Succeeded.next(), None);
    }

    #[test]
    fn stage_percent_is_monotonic() {
        let stages = [
            Stage::Queued,
            Stage::Authenticating,
            Stage::Fetching,
            Stage::Building,
            Stage::Downloading,
            Stage::Succeeded,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].percent() < pair[1].percent());
        }
    }
}
