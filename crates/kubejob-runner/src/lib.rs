//! Submit a Kubernetes Job and follow it to a normalized result
//!
//! [`JobRunner`] composes the manifest, submits it, waits for the pod, streams
//! its output and reports the container exit code as an [`ExecutionResult`].
//! Once the Job exists every failure is folded into a degraded result
//! (`status_code == -1`), so only configuration and submission errors surface
//! as [`RunError`].
//!
//! - [`client`] - the `JobClient` seam and its kube-backed implementation
//! - [`pod_watch`] / [`completion`] - timeout-bounded watches
//! - [`logs`] - output sinks and log following
//! - [`pipeline`] - stage sequencing

pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod logs;
pub mod pipeline;
pub mod pod_watch;
pub mod result;
pub mod submit;
mod worker;

pub use client::{EventStream, JobClient, KubeJobClient, ObjectEvent};
pub use config::{JobConfig, WatchTimeouts};
pub use error::{LifecycleError, RunError};
pub use logs::{BufferSink, OutputSink, StdoutSink};
pub use pipeline::JobRunner;
pub use pod_watch::{PhaseTracker, PhaseTransition, PodPhase};
pub use result::ExecutionResult;
pub use submit::JobIdentity;
