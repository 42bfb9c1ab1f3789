//! Error type for the build service client.
//!
//! [`RemoteError`] carries enough to classify a failure into the retry
//! taxonomy: transient (retried with backoff), auth (token refresh), or
//! rejected (terminal).

use thiserror::Error;

use crate::state_machine::FailureKind;

/// Errors returned by build service calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a non-success HTTP status.
    #[error("build service returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Network-layer failure (DNS, connection refused, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The submission response carried no recognizable job id.
    #[error("could not extract a job id from the submission response")]
    MissingJobId,
}

impl RemoteError {
    /// True for credential rejections: the session-expiry trio.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            RemoteError::Status {
                status: 401 | 403 | 419,
                ..
            }
        )
    }

    /// True when re-running the call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            RemoteError::Network(e) => e.is_timeout() || e.is_connect(),
            RemoteError::MissingJobId => false,
        }
    }

    /// Map onto the job-level failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_auth() {
            FailureKind::Auth(self.to_string())
        } else if self.is_transient() {
            FailureKind::Transient(self.to_string())
        } else {
            FailureKind::Rejected(self.to_string())
        }
    }
}
