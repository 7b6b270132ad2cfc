use rdb_types::RdbError;

/// Errors from remote store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The file does not exist at the given ref.
    #[error("file not found: {path} at {reference}")]
    NotFound { path: String, reference: String },

    /// The branch or ref does not exist.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// A write precondition failed: the file exists when it must not, is
    /// missing when a hash was expected, or has a different hash.
    #[error("precondition failed for {path}: {reason}")]
    Conflict { path: String, reason: String },

    /// The change request could not be merged.
    #[error("merge of {branch} into {base} conflicts on: {}", paths.join(", "))]
    MergeConflict {
        branch: String,
        base: String,
        paths: Vec<String>,
    },

    /// A container, process, or ref name is not usable as a path component.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Transport, authentication, or API failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Returns `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for a failed write precondition.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for RdbError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { path, reference } => {
                RdbError::not_found(format!("{path} at {reference}"))
            }
            StoreError::RefNotFound(name) => RdbError::not_found(format!("ref {name}")),
            StoreError::InvalidName { .. } => RdbError::Validation(err.to_string()),
            other => RdbError::Remote(other.to_string()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rdb_types::ErrorKind;

    #[test]
    fn converts_into_taxonomy() {
        let nf: RdbError = StoreError::NotFound {
            path: "Companies/Companies.json".into(),
            reference: "main".into(),
        }
        .into();
        assert_eq!(nf.kind(), ErrorKind::NotFound);

        let conflict: RdbError = StoreError::Conflict {
            path: "x".into(),
            reason: "stale hash".into(),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::RemoteCall);

        let invalid: RdbError = StoreError::InvalidName {
            name: "a/b".into(),
            reason: "slash".into(),
        }
        .into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);
    }

    #[test]
    fn merge_conflict_lists_paths() {
        let err = StoreError::MergeConflict {
            branch: "b".into(),
            base: "main".into(),
            paths: vec!["A/A.json".into(), "B/B.json".into()],
        };
        assert!(err.to_string().contains("A/A.json, B/B.json"));
    }
}
