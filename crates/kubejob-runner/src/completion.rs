//! Waiting for the Job to finish
//!
//! A Job is done once `status.completionTime` is set. Jobs that exhaust their
//! backoff never get a completion time, only a `Failed` condition, so that
//! counts as finished too and the exit code is still read from the pod.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use tracing::{debug, error, info, warn};

use kubejob_common::name_field_selector;

use crate::client::{JobClient, ObjectEvent};
use crate::error::LifecycleError;
use crate::submit::JobIdentity;

/// How a finished Job ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// `status.completionTime` is set
    Completed,
    /// A `Failed` condition is true
    Failed,
}

/// Terminal state of `job`, if it has reached one
pub fn completion_of(job: &Job) -> Option<Completion> {
    let status = job.status.as_ref()?;
    if status.completion_time.is_some() {
        return Some(Completion::Completed);
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    failed.then_some(Completion::Failed)
}

/// Wait for `job` to finish, bounded by `timeout`
pub async fn wait_for_completion(
    client: Arc<dyn JobClient>,
    job: JobIdentity,
    timeout: Duration,
) -> Result<Job, LifecycleError> {
    let watch = watch_until_complete(client.as_ref(), &job, timeout);
    match tokio::time::timeout(timeout, watch).await {
        Ok(Ok(finished)) => Ok(finished),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            error!(job = %job.name, ?timeout, "job did not complete in time");
            Err(LifecycleError::JobNeverCompleted {
                job: job.name,
                timeout,
            })
        }
    }
}

async fn watch_until_complete(
    client: &dyn JobClient,
    job: &JobIdentity,
    timeout: Duration,
) -> Result<Job, LifecycleError> {
    let selector = name_field_selector(&job.name);
    debug!(job = %job.name, %selector, "watching for job completion");

    let mut events = client
        .watch_jobs(&job.namespace, &selector)
        .await
        .map_err(|source| LifecycleError::Api {
            job: job.name.clone(),
            source,
        })?;

    while let Some(event) = events.next().await {
        match event {
            Ok(ObjectEvent::Applied(observed)) => {
                if let Some(completion) = completion_of(&observed) {
                    info!(job = %job.name, ?completion, "job finished");
                    return Ok(observed);
                }
            }
            Ok(ObjectEvent::Deleted(_)) => {
                error!(job = %job.name, "job was deleted while running");
                return Err(LifecycleError::JobNotFound {
                    job: job.name.clone(),
                });
            }
            Err(e) => warn!(job = %job.name, error = %e, "job watch error"),
        }
    }

    error!(job = %job.name, "job watch closed before completion");
    Err(LifecycleError::JobNeverCompleted {
        job: job.name.clone(),
        timeout,
    })
}
