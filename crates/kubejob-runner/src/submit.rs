//! Job submission
//!
//! Exactly one create call per invocation. The manifest only carries a
//! `generateName` prefix; the name the API server assigns is the handle
//! every later stage uses.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::client::JobClient;
use crate::error::RunError;

/// Server-assigned identity of a submitted Job
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct JobIdentity {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Create the Job and return the identity the API server assigned.
///
/// Transport and API failures are `SubmissionFailed` and are not retried.
pub async fn submit_job(
    client: &dyn JobClient,
    manifest: &Value,
    namespace: &str,
) -> Result<JobIdentity, RunError> {
    let meta = client
        .create_job(namespace, manifest)
        .await
        .map_err(|source| RunError::SubmissionFailed {
            namespace: namespace.to_string(),
            source,
        })?;

    let name = meta.name.ok_or_else(|| RunError::SubmissionFailed {
        namespace: namespace.to_string(),
        source: kubejob_common::Error::internal_with_context(
            "create_job",
            "API server returned a Job without a name",
        ),
    })?;
    let namespace = meta.namespace.unwrap_or_else(|| namespace.to_string());

    info!(job = %name, namespace = %namespace, "job submitted");
    Ok(JobIdentity { name, namespace })
}
