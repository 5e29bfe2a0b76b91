//! Mapping from (client, bucket, key) to the on-disk location of an object.
//!
//! Objects live at `<client name>/<bucket name>/<key>` relative to the
//! storage root. `resolve` is pure; the validators here are what keeps
//! client-supplied keys and names from escaping that layout.

use std::path::PathBuf;

use crate::errors::{StorageError, StorageResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_SEGMENT_NAME_LEN: usize = 128;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Build the storage path for an object, relative to the storage root.
///
/// Empty segments produced by repeated or trailing separators are dropped.
/// `..` is not interpreted here; keys are validated before they reach this point.
pub fn resolve(client_name: &str, bucket_name: &str, key: &str) -> PathBuf {
    [client_name, bucket_name, key]
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Reject object keys that could escape the bucket directory or that do not
/// map onto a plain relative path.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| Err(StorageError::validation(format!("key is invalid: {reason}")));

    if key.is_empty() {
        return Err(StorageError::validation("key is required"));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return invalid("must be at most 1024 bytes");
    }
    if key.starts_with('/') {
        return invalid("must not start with '/'");
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return invalid("must not contain control characters or backslashes");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("must not contain empty path segments"),
            "." | ".." => return invalid("must not contain '.' or '..' segments"),
            _ => {}
        }
    }
    Ok(())
}

/// Validate a client name, which becomes the first directory level.
pub fn ensure_client_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| Err(StorageError::validation(format!("name is invalid: {reason}")));

    if name.trim().is_empty() {
        return Err(StorageError::validation("name is required"));
    }
    if name.trim() != name {
        return invalid("cannot begin or end with whitespace");
    }
    if name.len() > MAX_SEGMENT_NAME_LEN {
        return invalid("must be at most 128 bytes");
    }
    if name == "." || name == ".." {
        return invalid("must not be '.' or '..'");
    }
    if name
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return invalid("must not contain separators or control characters");
    }
    Ok(())
}

/// Validate a bucket name.
///
/// - 1–63 characters
/// - ASCII letters, digits and hyphens only
/// - cannot start or end with a hyphen
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::validation("name is required"));
    }
    if name.len() > BUCKET_NAME_MAX_LEN {
        return Err(StorageError::validation(
            "name must be between 1 and 63 characters",
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(StorageError::validation(
            "name must be alphanumeric with dashes (cannot start or end with a dash)",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(StorageError::validation(
            "name must be alphanumeric with dashes (cannot start or end with a dash)",
        ));
    }
    Ok(())
}
