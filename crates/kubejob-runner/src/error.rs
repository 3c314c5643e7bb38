//! Runner error types
//!
//! `RunError` is the only error a caller of [`crate::JobRunner`] ever sees:
//! bad configuration or a failed submission. Everything that goes wrong after
//! the job was accepted is a `LifecycleError`, which the pipeline logs and
//! folds into a degraded [`crate::ExecutionResult`].

use std::time::Duration;

use kubejob_manifest::ManifestError;

/// Errors that escape the runner
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid job configuration: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to submit job in namespace '{namespace}': {source}")]
    SubmissionFailed {
        namespace: String,
        source: kubejob_common::Error,
    },
}

/// Failures observing a submitted job
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("job '{job}': pod never started within {timeout:?}")]
    PodNeverStarted { job: String, timeout: Duration },

    #[error("job '{job}': did not complete within {timeout:?}")]
    JobNeverCompleted { job: String, timeout: Duration },

    #[error("job '{job}' no longer exists")]
    JobNotFound { job: String },

    #[error("pod '{pod}' no longer exists")]
    PodNotFound { pod: String },

    #[error("pod '{pod}' has no exit code: {reason}")]
    ExitCodeUnavailable { pod: String, reason: String },

    #[error("job '{job}': {source}")]
    Api {
        job: String,
        source: kubejob_common::Error,
    },

    #[error("{stage} worker failed: {message}")]
    Worker { stage: &'static str, message: String },
}
