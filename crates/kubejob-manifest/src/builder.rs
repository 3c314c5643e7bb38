//! Job manifest composition
//!
//! A `ManifestBuilder` owns a validated base template. `build` layers two
//! patch sets on top of it, always in this order:
//!
//! 1. shortcut patches derived from `ShortcutFields` (namespace, image,
//!    labels, env, pull policy, service account, command, name)
//! 2. caller-supplied override patches
//!
//! so an override can always clobber a shortcut. The result must still contain
//! every path of the canonical template.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use kubejob_common::kube_utils::deterministic_hash;
use kubejob_common::DEFAULT_NAMESPACE;

use crate::error::ManifestError;
use crate::patch::{diff, escape_pointer_segment, PatchOp, PatchSet};
use crate::slug::{slugify_label, slugify_name};

/// Name of the single container in the canonical template
pub const DEFAULT_CONTAINER_NAME: &str = "kubejob";

/// Prefix for names synthesized from the command and environment
pub const GENERATED_NAME_PREFIX: &str = "kubejob-";

const CONTAINER_PATH: &str = "/spec/template/spec/containers/0";
const POD_SPEC_PATH: &str = "/spec/template/spec";

/// Image pull policy for the job container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    IfNotPresent,
    Always,
    Never,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IfNotPresent => "IfNotPresent",
            Self::Always => "Always",
            Self::Never => "Never",
        }
    }
}

impl std::fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pod restart policies a Job accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The bare minimum Job manifest every base template must contain.
///
/// The pod never restarts in place: a failed attempt is reported through the
/// container exit code and retries belong to whoever invoked us.
pub fn base_job_manifest() -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"labels": {}},
        "spec": {
            "parallelism": 1,
            "completions": 1,
            "template": {
                "spec": {
                    "restartPolicy": RestartPolicy::Never.as_str(),
                    "containers": [
                        {"name": DEFAULT_CONTAINER_NAME, "env": []}
                    ]
                }
            }
        }
    })
}

/// Load a base Job manifest from a YAML or JSON file
pub fn load_job_manifest(path: &Path) -> Result<Value, ManifestError> {
    Ok(kubejob_common::yaml::load_yaml_file(path)?)
}

/// High-level fields translated into shortcut patches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutFields {
    /// Namespace the job is created in
    pub namespace: String,
    /// Container image
    pub image: Option<String>,
    /// Labels added to the Job metadata; values are slugified
    pub labels: BTreeMap<String, String>,
    /// Environment variables appended to the container env
    pub env: BTreeMap<String, String>,
    pub image_pull_policy: Option<ImagePullPolicy>,
    pub service_account_name: Option<String>,
    /// Container command vector
    pub command: Vec<String>,
    /// Human-readable name, slugified into `generateName`
    pub name: Option<String>,
}

impl Default for ShortcutFields {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: None,
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
            image_pull_policy: None,
            service_account_name: None,
            command: Vec::new(),
            name: None,
        }
    }
}

/// Synthesize a `generateName` prefix from the command and environment.
///
/// Stable across runs and independent of map insertion order, so repeated
/// runs of the same configuration get recognizably related names while the
/// API server still appends a unique suffix.
pub fn generated_name_prefix(command: &[String], env: &BTreeMap<String, String>) -> String {
    let parts = std::iter::once(command.len().to_string())
        .chain(command.iter().cloned())
        .chain(env.iter().flat_map(|(k, v)| [k.clone(), v.clone()]));
    format!("{}{}", GENERATED_NAME_PREFIX, deterministic_hash(parts))
}

/// Composes Job manifests from a validated base template
#[derive(Clone, Debug)]
pub struct ManifestBuilder {
    base: Value,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self {
            base: base_job_manifest(),
        }
    }
}

impl ManifestBuilder {
    /// Validate `base` against the canonical template and wrap it
    pub fn new(base: Value) -> Result<Self, ManifestError> {
        validate_base(&base)?;
        Ok(Self { base })
    }

    /// Load and validate a base template from a YAML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        Self::new(load_job_manifest(path)?)
    }

    /// The validated base template
    pub fn base(&self) -> &Value {
        &self.base
    }

    /// Translate high-level fields into `add` operations
    pub fn shortcut_patches(&self, fields: &ShortcutFields) -> PatchSet {
        let mut patch = PatchSet::default();

        patch.push(PatchOp::add("/metadata/namespace", fields.namespace.as_str()));

        if let Some(image) = &fields.image {
            patch.push(PatchOp::add(
                format!("{}/image", CONTAINER_PATH),
                image.as_str(),
            ));
        }

        for (key, value) in &fields.labels {
            patch.push(PatchOp::add(
                format!("/metadata/labels/{}", escape_pointer_segment(key)),
                slugify_label(value),
            ));
        }

        for (key, value) in &fields.env {
            patch.push(PatchOp::add(
                format!("{}/env/-", CONTAINER_PATH),
                json!({"name": key, "value": value}),
            ));
        }

        if let Some(policy) = fields.image_pull_policy {
            patch.push(PatchOp::add(
                format!("{}/imagePullPolicy", CONTAINER_PATH),
                policy.as_str(),
            ));
        }

        if let Some(account) = &fields.service_account_name {
            patch.push(PatchOp::add(
                format!("{}/serviceAccountName", POD_SPEC_PATH),
                account.as_str(),
            ));
        }

        if !fields.command.is_empty() {
            patch.push(PatchOp::add(
                format!("{}/command", CONTAINER_PATH),
                fields.command.clone(),
            ));
        }

        let generate_name = fields
            .name
            .as_deref()
            .map(slugify_name)
            .filter(|slug| !slug.is_empty())
            .unwrap_or_else(|| generated_name_prefix(&fields.command, &fields.env));
        patch.push(PatchOp::add("/metadata/generateName", generate_name));

        patch
    }

    /// Compose the final manifest: shortcuts first, then overrides
    pub fn build(
        &self,
        fields: &ShortcutFields,
        overrides: &PatchSet,
    ) -> Result<Value, ManifestError> {
        let shortcuts = self.shortcut_patches(fields);
        let with_shortcuts = shortcuts.apply(&self.base)?;
        let composed = overrides.apply(&with_shortcuts)?;
        ensure_required_paths(&composed)?;

        debug!(
            shortcuts = shortcuts.len(),
            overrides = overrides.len(),
            namespace = %fields.namespace,
            "composed job manifest"
        );
        Ok(composed)
    }

    /// Render the composed manifest as YAML without submitting anything
    pub fn preview(
        &self,
        fields: &ShortcutFields,
        overrides: &PatchSet,
    ) -> Result<String, ManifestError> {
        let manifest = self.build(fields, overrides)?;
        Ok(kubejob_common::yaml::to_yaml_string(&manifest)?)
    }
}

/// Pointers of the canonical template that `manifest` lacks, sorted.
///
/// A node of the wrong kind (a scalar where a mapping or sequence belongs)
/// is reported itself, since nothing beneath it can exist.
fn missing_paths(manifest: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    collect_missing(&base_job_manifest(), manifest, "", &mut missing);
    missing.sort();
    missing
}

fn collect_missing(required: &Value, actual: &Value, pointer: &str, missing: &mut Vec<String>) {
    match (required, actual) {
        (Value::Object(required), Value::Object(actual)) => {
            for (key, child) in required {
                let path = format!("{}/{}", pointer, escape_pointer_segment(key));
                match actual.get(key) {
                    Some(value) => collect_missing(child, value, &path, missing),
                    None => missing.push(path),
                }
            }
        }
        (Value::Array(required), Value::Array(actual)) => {
            for (index, child) in required.iter().enumerate() {
                let path = format!("{}/{}", pointer, index);
                match actual.get(index) {
                    Some(value) => collect_missing(child, value, &path, missing),
                    None => missing.push(path),
                }
            }
        }
        (Value::Object(_) | Value::Array(_), _) => missing.push(pointer.to_string()),
        _ => {}
    }
}

/// Reject base templates that lack required structure or pin a fixed value
/// (such as the restart policy) to something else.
///
/// Members the template adds beyond the canonical structure are allowed.
pub fn validate_base(base: &Value) -> Result<(), ManifestError> {
    let missing = missing_paths(base);
    if !missing.is_empty() {
        return Err(ManifestError::MissingRequiredPath { paths: missing });
    }

    let mut incompatible: Vec<String> = diff(base, &base_job_manifest())
        .ops()
        .iter()
        .filter_map(|op| match op {
            PatchOp::Replace { path, value } => {
                Some(format!("{} must have value {}", path, value))
            }
            _ => None,
        })
        .collect();
    if !incompatible.is_empty() {
        incompatible.sort();
        return Err(ManifestError::IncompatibleValue {
            violations: incompatible,
        });
    }

    Ok(())
}

/// Composition may add or replace but must never drop canonical paths
fn ensure_required_paths(manifest: &Value) -> Result<(), ManifestError> {
    let missing = missing_paths(manifest);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::MissingRequiredPath { paths: missing })
    }
}
