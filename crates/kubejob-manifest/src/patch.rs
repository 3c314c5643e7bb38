//! RFC 6902 patch operations over `serde_json::Value` documents
//!
//! `PatchOp` restricts the wire format to `add`, `replace` and `remove`;
//! applying them is delegated to `json_patch` with pointers parsed by
//! `jsonptr`. `diff` produces the operations needed to turn one document into
//! another.

use std::path::Path;

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::{PointerBuf, Token};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ManifestError;

/// Why a single patch operation could not be applied
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    #[error(transparent)]
    Apply(#[from] json_patch::PatchError),
}

/// A single structural mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a value, or overwrite an existing object member
    Add { path: String, value: Value },
    /// Overwrite a value that must already exist
    Replace { path: String, value: Value },
    /// Delete a value that must already exist
    Remove { path: String },
}

impl PatchOp {
    /// Build an `add` operation
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Add {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Build a `replace` operation
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Build a `remove` operation
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    /// The operation name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
        }
    }

    /// Target pointer of the operation
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }

    /// The equivalent `json_patch` operation
    fn to_operation(&self) -> Result<PatchOperation, PatchError> {
        let pointer = |path: &str| {
            PointerBuf::parse(path).map_err(|e| PatchError::InvalidPointer(e.to_string()))
        };
        Ok(match self {
            Self::Add { path, value } => PatchOperation::Add(AddOperation {
                path: pointer(path)?,
                value: value.clone(),
            }),
            Self::Replace { path, value } => PatchOperation::Replace(ReplaceOperation {
                path: pointer(path)?,
                value: value.clone(),
            }),
            Self::Remove { path } => PatchOperation::Remove(RemoveOperation {
                path: pointer(path)?,
            }),
        })
    }

    /// Apply this operation to `doc` in place
    pub fn apply_to(&self, doc: &mut Value) -> Result<(), PatchError> {
        let operation = self.to_operation()?;
        json_patch::patch(doc, std::slice::from_ref(&operation))?;
        Ok(())
    }
}

/// An ordered sequence of patch operations, applied left to right
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchSet(Vec<PatchOp>);

impl PatchSet {
    /// Create a patch set from operations
    pub fn new(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }

    /// Parse a patch set from a JSON value (an array of operation objects)
    pub fn from_value(value: Value) -> Result<Self, ManifestError> {
        serde_json::from_value(value)
            .map_err(|e| ManifestError::InvalidPatchDocument(e.to_string()))
    }

    /// Load a patch set from a YAML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let value = kubejob_common::yaml::load_yaml_file(path)?;
        Self::from_value(value)
    }

    /// Append an operation
    pub fn push(&mut self, op: PatchOp) {
        self.0.push(op);
    }

    /// Operations in application order
    pub fn ops(&self) -> &[PatchOp] {
        &self.0
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no operations
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply every operation in order to a copy of `doc`.
    ///
    /// Either all operations succeed and the patched copy is returned, or the
    /// first failing operation is reported and `doc` is left as it was.
    pub fn apply(&self, doc: &Value) -> Result<Value, ManifestError> {
        let mut patched = doc.clone();
        for (index, op) in self.0.iter().enumerate() {
            op.apply_to(&mut patched)
                .map_err(|source| ManifestError::Patch {
                    index,
                    op: op.name(),
                    path: op.path().to_string(),
                    source,
                })?;
        }
        Ok(patched)
    }
}

impl From<Vec<PatchOp>> for PatchSet {
    fn from(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }
}

impl IntoIterator for PatchSet {
    type Item = PatchOp;
    type IntoIter = std::vec::IntoIter<PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Escape a single pointer segment (`~` → `~0`, `/` → `~1`)
pub fn escape_pointer_segment(segment: &str) -> String {
    Token::new(segment).encoded().to_string()
}

/// Compute the operations that turn `from` into `to`.
///
/// Objects are compared member by member and arrays element by element:
/// members only in `to` become `add`, members only in `from` become `remove`
/// and differing scalars (or differing kinds of value) become `replace`. An
/// empty container on either side is still compared member by member.
/// Applying the result to `from` yields a document equal to `to`.
pub fn diff(from: &Value, to: &Value) -> PatchSet {
    let mut ops = Vec::new();
    diff_into(from, to, String::new(), &mut ops);
    PatchSet(ops)
}

fn diff_into(from: &Value, to: &Value, path: String, ops: &mut Vec<PatchOp>) {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = format!("{}/{}", path, escape_pointer_segment(key));
                match b.get(key) {
                    Some(new) => diff_into(old, new, child, ops),
                    None => ops.push(PatchOp::remove(child)),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    let child = format!("{}/{}", path, escape_pointer_segment(key));
                    ops.push(PatchOp::add(child, new.clone()));
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for (i, (old, new)) in a.iter().zip(b).enumerate() {
                diff_into(old, new, format!("{}/{}", path, i), ops);
            }
            for (i, new) in b.iter().enumerate().skip(common) {
                ops.push(PatchOp::add(format!("{}/{}", path, i), new.clone()));
            }
            // Highest index first so earlier removals don't shift later ones
            for i in (common..a.len()).rev() {
                ops.push(PatchOp::remove(format!("{}/{}", path, i)));
            }
        }
        _ if from == to => {}
        _ => ops.push(PatchOp::replace(path, to.clone())),
    }
}
