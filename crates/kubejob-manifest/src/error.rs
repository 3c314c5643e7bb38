//! Manifest error types

use crate::patch::PatchError;

/// Errors raised while validating or composing a job manifest.
///
/// All of these are configuration errors: they happen before anything is sent
/// to the cluster and retrying without changing the input cannot help.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("job is missing required attributes at the following paths: {}", .paths.join(", "))]
    MissingRequiredPath { paths: Vec<String> },

    #[error("job has incompatible values for the following attributes: {}", .violations.join(", "))]
    IncompatibleValue { violations: Vec<String> },

    #[error("patch operation {index} ({op} {path}) failed: {source}")]
    Patch {
        index: usize,
        op: &'static str,
        path: String,
        source: PatchError,
    },

    #[error("invalid patch document: {0}")]
    InvalidPatchDocument(String),

    #[error("{0}")]
    Common(#[from] kubejob_common::Error),
}
