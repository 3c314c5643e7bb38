//! Job manifest model and composition
//!
//! - [`patch`] - RFC 6902 operations (`add`, `replace`, `remove`) and structural diff
//! - [`slug`] - DNS-label shaped slugs for names and label values
//! - [`builder`] - canonical template, validation, shortcut and override composition

pub mod builder;
pub mod error;
pub mod patch;
pub mod slug;

pub use builder::{
    base_job_manifest, generated_name_prefix, load_job_manifest, ImagePullPolicy,
    ManifestBuilder, RestartPolicy, ShortcutFields,
};
pub use error::ManifestError;
pub use patch::{diff, escape_pointer_segment, PatchError, PatchOp, PatchSet};
