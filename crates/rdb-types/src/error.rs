use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::TransactionId;

/// Errors produced anywhere in RepoDB.
///
/// Every variant belongs to one of five categories (see [`ErrorKind`]); the
/// category decides the status code of the uniform outcome envelope and
/// whether a caller may sensibly retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RdbError {
    /// Bad caller input. Raised before any remote side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// A record, file, ref, or container does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The container is locked by another in-flight transaction.
    #[error("container '{container}' is locked by another transaction")]
    LockConflict { container: String },

    /// The remote store call failed (transport, API, or precondition).
    #[error("remote call failed: {0}")]
    Remote(String),

    /// A pipeline step failed after earlier steps completed.
    #[error("{0}")]
    TransactionAbort(Box<AbortReport>),

    /// Merging the working branch failed; its locks are still held.
    #[error("merge of branch '{branch}' failed ({reason}); containers still locked: {}", containers.join(", "))]
    MergeFailed {
        branch: String,
        containers: Vec<String>,
        reason: String,
    },

    /// Deleting a lock sentinel failed; an operator must unlock manually.
    #[error("failed to unlock container '{container}' on branch '{branch}': {reason}")]
    UnlockFailed {
        container: String,
        branch: String,
        reason: String,
    },

    /// A stored blob could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RdbError {
    /// Convenience constructor for [`RdbError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Convenience constructor for [`RdbError::LockConflict`].
    pub fn lock_conflict(container: impl Into<String>) -> Self {
        Self::LockConflict {
            container: container.into(),
        }
    }

    /// The error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::Remote(_) | Self::Serialization(_) => ErrorKind::RemoteCall,
            Self::TransactionAbort(_) | Self::MergeFailed { .. } | Self::UnlockFailed { .. } => {
                ErrorKind::TransactionAbort
            }
        }
    }

    /// Numeric status for the outcome envelope.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Whether the caller may retry the same request later.
    ///
    /// RepoDB itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::LockConflict | ErrorKind::RemoteCall)
    }

    /// The abort report, if this is a [`RdbError::TransactionAbort`].
    pub fn abort_report(&self) -> Option<&AbortReport> {
        match self {
            Self::TransactionAbort(report) => Some(report),
            _ => None,
        }
    }

    /// The innermost error, looking through any abort reports.
    pub fn root_cause(&self) -> &RdbError {
        match self {
            Self::TransactionAbort(report) => report.cause.root_cause(),
            other => other,
        }
    }
}

/// Error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    LockConflict,
    RemoteCall,
    TransactionAbort,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::LockConflict => 423,
            Self::RemoteCall => 502,
            Self::TransactionAbort => 500,
        }
    }
}

/// Context attached to a pipeline abort so an operator can reconcile
/// partially applied remote state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortReport {
    /// Identifier of the aborted run.
    pub run_id: TransactionId,
    /// Enclosing run, when the pipeline was started from inside another one.
    pub parent_run: Option<TransactionId>,
    /// Pipeline name given to the executor.
    pub pipeline: String,
    /// Zero-based index of the failing step.
    pub failed_step: usize,
    /// Name of the failing step.
    pub step_name: String,
    /// Steps that finished successfully before the failure.
    pub completed_steps: usize,
    /// Working branch of the enclosing branch transaction, if any.
    pub branch: Option<String>,
    /// Containers whose lock sentinels are still present.
    pub locked_containers: Vec<String>,
    /// The failing step's own error.
    pub cause: Box<RdbError>,
}

impl AbortReport {
    /// Attach branch-transaction context.
    pub fn with_branch(
        mut self,
        branch: impl Into<String>,
        locked_containers: Vec<String>,
    ) -> Self {
        self.branch = Some(branch.into());
        self.locked_containers = locked_containers;
        self
    }
}

impl fmt::Display for AbortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction '{}' ({}) aborted at step {} '{}' after {} completed step(s): {}",
            self.pipeline,
            self.run_id.short_id(),
            self.failed_step,
            self.step_name,
            self.completed_steps,
            self.cause
        )?;
        if let Some(branch) = &self.branch {
            write!(f, "; branch '{branch}'")?;
        }
        if !self.locked_containers.is_empty() {
            write!(
                f,
                "; still locked: {}",
                self.locked_containers.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Result alias used across RepoDB crates.
pub type RdbResult<T> = Result<T, RdbError>;
