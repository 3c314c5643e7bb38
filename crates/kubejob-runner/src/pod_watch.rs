//! Waiting for the job's pod to leave `Pending`
//!
//! Pods are selected by the `job-name` label the Job controller stamps on
//! them. Every phase change is logged; the first phase other than `Pending`
//! ends the wait and hands back that pod.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use kubejob_common::job_pod_selector;

use crate::client::{JobClient, ObjectEvent};
use crate::error::LifecycleError;
use crate::submit::JobIdentity;

/// Pod lifecycle phase as reported in `status.phase`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Phase of `pod`. A pod without a phase yet has not been scheduled and
    /// counts as `Pending`; unrecognized values count as `Unknown`.
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            None | Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some(_) => Self::Unknown,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change between two consecutively observed phases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTransition {
    /// `None` for the first observation
    pub from: Option<PodPhase>,
    pub to: PodPhase,
}

/// Remembers the last observed phase and reports changes
#[derive(Debug, Default)]
pub struct PhaseTracker {
    last: Option<PodPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `phase`, returning a transition if it differs from the last one
    pub fn observe(&mut self, phase: PodPhase) -> Option<PhaseTransition> {
        if self.last == Some(phase) {
            return None;
        }
        let transition = PhaseTransition {
            from: self.last,
            to: phase,
        };
        self.last = Some(phase);
        Some(transition)
    }

    pub fn last(&self) -> Option<PodPhase> {
        self.last
    }
}

/// Wait until a pod of `job` is no longer pending, bounded by `timeout`
pub async fn wait_for_pod_start(
    client: Arc<dyn JobClient>,
    job: JobIdentity,
    timeout: Duration,
) -> Result<Pod, LifecycleError> {
    match tokio::time::timeout(timeout, watch_until_started(client.as_ref(), &job)).await {
        Ok(Some(pod)) => Ok(pod),
        Ok(None) => {
            error!(job = %job.name, "pod watch ended before the pod started");
            Err(LifecycleError::PodNeverStarted {
                job: job.name,
                timeout,
            })
        }
        Err(_) => {
            error!(job = %job.name, ?timeout, "pod did not start in time");
            Err(LifecycleError::PodNeverStarted {
                job: job.name,
                timeout,
            })
        }
    }
}

/// Consume pod events until one is past `Pending`; `None` if the watch closes
async fn watch_until_started(client: &dyn JobClient, job: &JobIdentity) -> Option<Pod> {
    let selector = job_pod_selector(&job.name);
    debug!(job = %job.name, %selector, "watching for job pod");

    let mut events = match client.watch_pods(&job.namespace, &selector).await {
        Ok(events) => events,
        Err(e) => {
            warn!(job = %job.name, error = %e, "failed to open pod watch");
            return None;
        }
    };

    let mut tracker = PhaseTracker::new();
    while let Some(event) = events.next().await {
        let pod = match event {
            Ok(ObjectEvent::Applied(pod)) => pod,
            Ok(ObjectEvent::Deleted(pod)) => {
                debug!(job = %job.name, pod = ?pod.metadata.name, "job pod deleted");
                continue;
            }
            Err(e) => {
                // The watcher backs off and reconnects on its own
                warn!(job = %job.name, error = %e, "pod watch error");
                continue;
            }
        };

        let phase = PodPhase::of(&pod);
        if let Some(t) = tracker.observe(phase) {
            info!(
                job = %job.name,
                pod = ?pod.metadata.name,
                from = ?t.from.map(|p| p.as_str()),
                phase = %t.to,
                "pod phase changed"
            );
        }
        if !phase.is_pending() {
            return Some(pod);
        }
    }
    None
}
