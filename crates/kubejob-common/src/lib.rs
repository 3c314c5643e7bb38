//! Common types for kubejob: errors, YAML parsing, telemetry and client helpers

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label the Job controller stamps on every pod it creates for a Job
pub const JOB_NAME_LABEL: &str = "job-name";

/// Namespace used when the caller does not pick one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Build the label selector matching the pods owned by a job
pub fn job_pod_selector(job_name: &str) -> String {
    format!("{}={}", JOB_NAME_LABEL, job_name)
}

/// Build the field selector matching exactly one object by name
pub fn name_field_selector(name: &str) -> String {
    format!("metadata.name={}", name)
}
