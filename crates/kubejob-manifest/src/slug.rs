//! Slugs for object names and label values
//!
//! Kubernetes names and label values must be DNS-label shaped: lowercase
//! alphanumerics and dashes, at most 63 characters. Names handed to
//! `generateName` are capped lower so the server-appended random suffix still
//! fits.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Maximum slug length for a `generateName` prefix
pub const NAME_MAX_LEN: usize = 45;

/// Maximum slug length for a label value
pub const LABEL_MAX_LEN: usize = 63;

/// Normalize free text into `[a-z0-9-]`, capped at `max_len` characters.
///
/// Input is decomposed (NFKD) with accents dropped, so `é` becomes `e`, then
/// lower-cased. Every run of other characters (and of dashes) collapses to a
/// single `-`, and dashes are trimmed from both ends, including any left
/// dangling by truncation. The result can be empty.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len().min(max_len));
    let mut pending_dash = false;

    let folded = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase);
    for ch in folded {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    // Only ASCII remains, so byte and char offsets agree
    slug.truncate(max_len);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Slug suitable as a `generateName` prefix
pub fn slugify_name(name: &str) -> String {
    slugify(name, NAME_MAX_LEN)
}

/// Slug suitable as a label value
pub fn slugify_label(label: &str) -> String {
    slugify(label, LABEL_MAX_LEN)
}
