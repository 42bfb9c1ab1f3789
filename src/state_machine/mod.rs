mod job;
mod stage;

pub use job::{FailureKind, Job, JobOutcome, JobRecord, RetryConfig, StageOutcome};
pub use stage::{Stage, StateMachine, Transition};
