//! Persisted layout of containers in the remote store.
//!
//! - `<Container>/<Container>.json` holds the container's JSON array.
//! - `<Container>/<process>.lock` is the zero-length lock sentinel.
//!
//! Container and process names become path components, so they follow the
//! same conservative rules as branch names in git.

use crate::error::{StoreError, StoreResult};

/// Characters that are forbidden anywhere in a container or process name.
const FORBIDDEN_CHARS: &[char] = &[
    '/', ' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\',
];

/// Validate a name used as a single path component.
pub fn validate_component(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(StoreError::InvalidName {
                name: name.to_string(),
                reason: format!("contains forbidden character: {ch:?}"),
            });
        }
    }

    if name.starts_with('.') {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "must not start with '.'".into(),
        });
    }

    if name.ends_with(".lock") {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "must not end with '.lock'".into(),
        });
    }

    Ok(())
}

/// Path of the container's JSON blob.
pub fn container_path(container: &str) -> String {
    format!("{container}/{container}.json")
}

/// Path of the container's lock sentinel written by `process`.
pub fn lock_path(container: &str, process: &str) -> String {
    format!("{container}/{process}.lock")
}
