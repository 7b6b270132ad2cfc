use std::collections::BTreeMap;
use std::fmt;

use rdb_store::MergeReceipt;
use rdb_types::{names_equal, ContentHash, ObjectRecord, RdbError, RdbResult, TransactionId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TxnState
// ---------------------------------------------------------------------------

/// Lifecycle of a branch transaction.
///
/// `Idle → LockCheck → Locked → Branched → Staged → Merging`, ending in
/// `Released`, `Aborted`, or `FailedMerge`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    Idle,
    LockCheck,
    Locked,
    Branched,
    Staged,
    Merging,
    /// Merged and unlocked.
    Released,
    /// Stopped before merging; base-ref locks removed.
    Aborted,
    /// The merge failed; every lock is still held.
    FailedMerge,
}

impl TxnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Aborted | Self::FailedMerge)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::LockCheck => "lock_check",
            Self::Locked => "locked",
            Self::Branched => "branched",
            Self::Staged => "staged",
            Self::Merging => "merging",
            Self::Released => "released",
            Self::Aborted => "aborted",
            Self::FailedMerge => "failed_merge",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ContainerState
// ---------------------------------------------------------------------------

/// One locked container inside a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerState {
    /// Working copy; mutate freely before staging.
    pub objects: Vec<ObjectRecord>,
    /// Hash of the container blob on the working branch, `None` if the blob
    /// does not exist yet.
    pub blob_hash: Option<ContentHash>,
    /// Hash of the lock sentinel written at acquisition.
    pub lock_hash: ContentHash,
    /// Objects as last read from or written to the branch.
    pristine: Vec<ObjectRecord>,
}

impl ContainerState {
    pub(crate) fn new(
        objects: Vec<ObjectRecord>,
        blob_hash: Option<ContentHash>,
        lock_hash: ContentHash,
    ) -> Self {
        Self {
            pristine: objects.clone(),
            objects,
            blob_hash,
            lock_hash,
        }
    }

    /// Whether the working copy differs from the branch.
    pub fn is_dirty(&self) -> bool {
        self.objects != self.pristine
    }

    pub(crate) fn mark_written(&mut self, blob_hash: ContentHash) {
        self.blob_hash = Some(blob_hash);
        self.pristine = self.objects.clone();
    }

    /// Record named `name`, compared case-insensitively.
    pub fn find(&self, name: &str) -> Option<&ObjectRecord> {
        self.objects
            .iter()
            .find(|o| names_equal(&o.name, name))
    }

    /// Mutable form of [`Self::find`].
    pub fn find_mut(&mut self, name: &str) -> Option<&mut ObjectRecord> {
        self.objects
            .iter_mut()
            .find(|o| names_equal(&o.name, name))
    }
}

// ---------------------------------------------------------------------------
// LockSet
// ---------------------------------------------------------------------------

/// Locks held by a transaction, detached from its working copies.
///
/// Cheap to clone before handing the metadata to a pipeline, so a failure
/// path can still find and remove the sentinels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockSet {
    pub branch: String,
    pub locks: BTreeMap<String, ContentHash>,
}

impl LockSet {
    pub fn containers(&self) -> Vec<String> {
        self.locks.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// RepoMetadata
// ---------------------------------------------------------------------------

/// Per-transaction context produced by
/// [`crate::BranchTransaction::catch`] and consumed by
/// [`crate::BranchTransaction::release`].
#[derive(Clone, Debug)]
pub struct RepoMetadata {
    pub id: TransactionId,
    /// Working branch name.
    pub branch: String,
    /// Head of the working branch at creation.
    pub head: ContentHash,
    pub base_ref: String,
    pub containers: BTreeMap<String, ContainerState>,
    pub state: TxnState,
    /// Every state the transaction has passed through, oldest first,
    /// ending with `state`.
    pub history: Vec<TxnState>,
    /// Set once the branch has been merged.
    pub receipt: Option<MergeReceipt>,
}

impl RepoMetadata {
    pub(crate) fn advance(&mut self, to: TxnState) {
        self.state = to;
        if self.history.last() != Some(&to) {
            self.history.push(to);
        }
    }

    /// State of a container locked by this transaction.
    pub fn container(&self, name: &str) -> RdbResult<&ContainerState> {
        self.containers.get(name).ok_or_else(|| not_held(name))
    }

    pub fn container_mut(&mut self, name: &str) -> RdbResult<&mut ContainerState> {
        self.containers.get_mut(name).ok_or_else(|| not_held(name))
    }

    /// Working copy of a container's records.
    pub fn objects(&self, name: &str) -> RdbResult<&[ObjectRecord]> {
        Ok(&self.container(name)?.objects)
    }

    pub fn objects_mut(&mut self, name: &str) -> RdbResult<&mut Vec<ObjectRecord>> {
        Ok(&mut self.container_mut(name)?.objects)
    }

    /// Containers whose working copy differs from the branch.
    pub fn dirty_containers(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, c)| c.is_dirty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers.keys().cloned().collect()
    }

    pub fn lock_set(&self) -> LockSet {
        LockSet {
            branch: self.branch.clone(),
            locks: self
                .containers
                .iter()
                .map(|(name, c)| (name.clone(), c.lock_hash.clone()))
                .collect(),
        }
    }
}

fn not_held(name: &str) -> RdbError {
    RdbError::Validation(format!("container '{name}' is not part of this transaction"))
}
