//! Per-invocation job configuration
//!
//! Everything one run needs besides the cluster client: the base template,
//! shortcut fields, override patches, watch timeouts and whether to stream
//! the container output. Where the values come from is up to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kubejob_manifest::{base_job_manifest, ManifestBuilder, ManifestError, PatchSet, ShortcutFields};

pub const DEFAULT_POD_WATCH_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_JOB_WATCH_TIMEOUT_SECONDS: u64 = 5;

/// Independent bounds for the two watch stages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchTimeouts {
    /// Bound on the pod leaving `Pending`
    pub pod: Duration,
    /// Bound on the Job reaching completion
    pub job: Duration,
}

impl Default for WatchTimeouts {
    fn default() -> Self {
        Self {
            pod: Duration::from_secs(DEFAULT_POD_WATCH_TIMEOUT_SECONDS),
            job: Duration::from_secs(DEFAULT_JOB_WATCH_TIMEOUT_SECONDS),
        }
    }
}

/// Configuration for one job run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    /// Base Job manifest
    pub job: Value,
    /// Override patches applied after the shortcuts
    pub customizations: PatchSet,
    #[serde(flatten)]
    pub shortcuts: ShortcutFields,
    pub pod_watch_timeout_seconds: u64,
    pub job_watch_timeout_seconds: u64,
    /// Forward the container log to the output sink
    pub stream_output: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job: base_job_manifest(),
            customizations: PatchSet::default(),
            shortcuts: ShortcutFields::default(),
            pod_watch_timeout_seconds: DEFAULT_POD_WATCH_TIMEOUT_SECONDS,
            job_watch_timeout_seconds: DEFAULT_JOB_WATCH_TIMEOUT_SECONDS,
            stream_output: true,
        }
    }
}

impl JobConfig {
    pub fn timeouts(&self) -> WatchTimeouts {
        WatchTimeouts {
            pod: Duration::from_secs(self.pod_watch_timeout_seconds),
            job: Duration::from_secs(self.job_watch_timeout_seconds),
        }
    }

    /// Validate the base template and compose the manifest to submit
    pub fn build_manifest(&self) -> Result<Value, ManifestError> {
        ManifestBuilder::new(self.job.clone())?.build(&self.shortcuts, &self.customizations)
    }

    /// The composed manifest as YAML, without touching the cluster
    pub fn preview(&self) -> Result<String, ManifestError> {
        ManifestBuilder::new(self.job.clone())?.preview(&self.shortcuts, &self.customizations)
    }
}
