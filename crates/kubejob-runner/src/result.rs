//! Normalized execution result

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::info;

use crate::client::JobClient;
use crate::error::LifecycleError;
use crate::submit::JobIdentity;

/// Outcome of one job execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Container exit code, or [`ExecutionResult::UNKNOWN_STATUS`]
    pub status_code: i32,
    /// Name of the Job
    pub identifier: String,
}

impl ExecutionResult {
    /// No real exit code could be determined
    pub const UNKNOWN_STATUS: i32 = -1;

    pub fn new(status_code: i32, identifier: impl Into<String>) -> Self {
        Self {
            status_code,
            identifier: identifier.into(),
        }
    }

    /// Result for a job whose outcome could not be observed
    pub fn degraded(identifier: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN_STATUS, identifier)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }

    pub fn is_degraded(&self) -> bool {
        self.status_code == Self::UNKNOWN_STATUS
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exited with {}", self.identifier, self.status_code)
    }
}

/// Exit code of the first container, if it has terminated
pub fn exit_code_of(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| t.exit_code)
}

/// Re-read the pod and turn its first container's exit code into a result
pub async fn extract_result(
    client: &dyn JobClient,
    job: &JobIdentity,
    pod_name: &str,
) -> Result<ExecutionResult, LifecycleError> {
    let pod = client
        .get_pod_status(&job.namespace, pod_name)
        .await
        .map_err(|source| LifecycleError::Api {
            job: job.name.clone(),
            source,
        })?
        .ok_or_else(|| LifecycleError::PodNotFound {
            pod: pod_name.to_string(),
        })?;

    let code = exit_code_of(&pod).ok_or_else(|| LifecycleError::ExitCodeUnavailable {
        pod: pod_name.to_string(),
        reason: "first container has not terminated".to_string(),
    })?;

    info!(job = %job.name, pod = %pod_name, exit_code = code, "job container exited");
    Ok(ExecutionResult::new(code, &job.name))
}
