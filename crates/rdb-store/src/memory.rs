//! In-memory remote store for tests and embedding.
//!
//! [`InMemoryRemoteStore`] models a hosted repository: named branches holding
//! a flat file map, content hashes per blob, a head hash per branch, and change
//! requests that merge a branch into its base with a file-level three-way
//! check. Every call yields to the runtime first so concurrent callers
//! interleave the way they would against a real network API.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rdb_types::ContentHash;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BranchHandle, MergeReceipt, RemoteStoreClient};

/// Operations of the [`RemoteStoreClient`] contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FileHash,
    FileContent,
    PutFile,
    DeleteFile,
    CreateBranch,
    Merge,
}

/// One recorded call, for test verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    /// File path, or the branch name for branch operations.
    pub target: String,
    /// Ref the call was made against.
    pub reference: String,
}

/// A merged change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeRequest {
    pub id: u64,
    pub branch: String,
    pub base: String,
    pub title: String,
    /// Paths the merge changed on the base ref.
    pub changed_paths: Vec<String>,
}

/// A one-shot injected failure.
#[derive(Clone, Debug)]
struct FailOn {
    op: StoreOp,
    path: Option<String>,
    error: StoreError,
}

#[derive(Clone, Debug)]
struct BranchState {
    files: BTreeMap<String, Vec<u8>>,
    head: ContentHash,
    /// Base ref and file map at fork time; `None` for root branches.
    fork: Option<(String, BTreeMap<String, Vec<u8>>)>,
}

#[derive(Debug, Default)]
struct StoreState {
    branches: BTreeMap<String, BranchState>,
    next_branch: u64,
    next_change: u64,
    changes: Vec<ChangeRequest>,
    calls: Vec<StoreCall>,
    failures: Vec<FailOn>,
}

impl StoreState {
    fn record(&mut self, op: StoreOp, target: &str, reference: &str) -> StoreResult<()> {
        self.calls.push(StoreCall {
            op,
            target: target.to_string(),
            reference: reference.to_string(),
        });
        let hit = self.failures.iter().position(|f| {
            f.op == op && f.path.as_deref().map_or(true, |p| p == target)
        });
        match hit {
            Some(index) => Err(self.failures.remove(index).error),
            None => Ok(()),
        }
    }

    fn branch(&self, name: &str) -> StoreResult<&BranchState> {
        self.branches
            .get(name)
            .ok_or_else(|| StoreError::RefNotFound(name.to_string()))
    }

    fn branch_mut(&mut self, name: &str) -> StoreResult<&mut BranchState> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| StoreError::RefNotFound(name.to_string()))
    }
}

/// In-memory, branch-aware implementation of [`RemoteStoreClient`].
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection while the code under test owns another.
#[derive(Clone, Debug)]
pub struct InMemoryRemoteStore {
    default_branch: String,
    inner: Arc<Mutex<StoreState>>,
}

impl InMemoryRemoteStore {
    /// Create a store with a single empty branch named `default_branch`.
    pub fn new(default_branch: impl Into<String>) -> Self {
        let default_branch = default_branch.into();
        let mut state = StoreState::default();
        state.branches.insert(
            default_branch.clone(),
            BranchState {
                files: BTreeMap::new(),
                head: commit_hash(None, &format!("init {default_branch}")),
                fork: None,
            },
        );
        Self {
            default_branch,
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The branch created by [`Self::new`].
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Write a file directly, bypassing preconditions and the call log.
    pub fn seed_file(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        branch: &str,
    ) -> StoreResult<ContentHash> {
        let content = content.into();
        let hash = blob_hash(&content);
        let mut state = self.state();
        let target = state.branch_mut(branch)?;
        target.files.insert(path.to_string(), content);
        target.head = commit_hash(Some(&target.head), &format!("seed {path}"));
        Ok(hash)
    }

    /// Content of `path` on `reference`, bypassing the call log.
    pub fn file_at(&self, path: &str, reference: &str) -> Option<Vec<u8>> {
        let state = self.state();
        state.branches.get(reference)?.files.get(path).cloned()
    }

    /// Head hash of `reference`.
    pub fn head(&self, reference: &str) -> Option<ContentHash> {
        let state = self.state();
        state.branches.get(reference).map(|b| b.head.clone())
    }

    /// All branch names, sorted.
    pub fn branch_names(&self) -> Vec<String> {
        self.state().branches.keys().cloned().collect()
    }

    /// Paths present on `reference`, sorted.
    pub fn paths(&self, reference: &str) -> Vec<String> {
        let state = self.state();
        state
            .branches
            .get(reference)
            .map(|b| b.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Merged change requests in merge order.
    pub fn changes(&self) -> Vec<ChangeRequest> {
        self.state().changes.clone()
    }

    /// Every call made through the [`RemoteStoreClient`] interface.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Number of recorded calls of the given kind.
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.state().failures.push(FailOn {
            op,
            path: None,
            error,
        });
    }

    /// Make the next call of `op` whose target is exactly `path` fail.
    pub fn fail_next_on(&self, op: StoreOp, path: impl Into<String>, error: StoreError) {
        self.state().failures.push(FailOn {
            op,
            path: Some(path.into()),
            error,
        });
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new("main")
    }
}

#[async_trait]
impl RemoteStoreClient for InMemoryRemoteStore {
    async fn file_hash(&self, path: &str, reference: &str) -> StoreResult<ContentHash> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::FileHash, path, reference)?;
        let branch = state.branch(reference)?;
        branch
            .files
            .get(path)
            .map(|content| blob_hash(content))
            .ok_or_else(|| not_found(path, reference))
    }

    async fn file_content(&self, path: &str, reference: &str) -> StoreResult<Vec<u8>> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::FileContent, path, reference)?;
        let branch = state.branch(reference)?;
        branch
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path, reference))
    }

    async fn read_file(
        &self,
        path: &str,
        reference: &str,
    ) -> StoreResult<Option<(Vec<u8>, ContentHash)>> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::FileContent, path, reference)?;
        let branch = state.branch(reference)?;
        Ok(branch
            .files
            .get(path)
            .map(|content| (content.clone(), blob_hash(content))))
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
        expected: Option<&ContentHash>,
    ) -> StoreResult<ContentHash> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::PutFile, path, branch)?;
        let target = state.branch_mut(branch)?;

        let current = target.files.get(path).map(|c| blob_hash(c));
        match (expected, current) {
            (None, Some(_)) => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    reason: "file already exists".into(),
                })
            }
            (Some(_), None) => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    reason: "file does not exist".into(),
                })
            }
            (Some(want), Some(have)) if *want != have => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    reason: format!("expected hash {}, found {}", want.short(), have.short()),
                })
            }
            _ => {}
        }

        let hash = blob_hash(content);
        target.files.insert(path.to_string(), content.to_vec());
        target.head = commit_hash(Some(&target.head), message);
        debug!(path, branch, hash = %hash.short(), "file written");
        Ok(hash)
    }

    async fn delete_file(
        &self,
        path: &str,
        branch: &str,
        message: &str,
        expected: &ContentHash,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::DeleteFile, path, branch)?;
        let target = state.branch_mut(branch)?;

        let current = target
            .files
            .get(path)
            .map(|c| blob_hash(c))
            .ok_or_else(|| not_found(path, branch))?;
        if current != *expected {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                reason: format!(
                    "expected hash {}, found {}",
                    expected.short(),
                    current.short()
                ),
            });
        }

        target.files.remove(path);
        target.head = commit_hash(Some(&target.head), message);
        debug!(path, branch, "file deleted");
        Ok(())
    }

    async fn create_branch(&self, from_ref: &str) -> StoreResult<BranchHandle> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::CreateBranch, from_ref, from_ref)?;
        let base = state.branch(from_ref)?.clone();

        state.next_branch += 1;
        let name = format!(
            "{}-{}",
            chrono::Utc::now().timestamp_millis(),
            state.next_branch
        );
        state.branches.insert(
            name.clone(),
            BranchState {
                files: base.files.clone(),
                head: base.head.clone(),
                fork: Some((from_ref.to_string(), base.files)),
            },
        );
        debug!(branch = %name, from = from_ref, "branch created");
        Ok(BranchHandle {
            name,
            head: base.head,
        })
    }

    async fn create_and_merge_change(
        &self,
        branch: &str,
        base: &str,
        title: &str,
    ) -> StoreResult<MergeReceipt> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(StoreOp::Merge, branch, base)?;

        let source = state.branch(branch)?.clone();
        let fork_files = match &source.fork {
            Some((fork_base, files)) if fork_base == base => files.clone(),
            _ => BTreeMap::new(),
        };
        let target = state.branch(base)?;

        // Paths the branch changed since it forked.
        let touched: BTreeSet<&String> = source
            .files
            .keys()
            .chain(fork_files.keys())
            .filter(|path| source.files.get(*path) != fork_files.get(*path))
            .collect();

        let conflicts: Vec<String> = touched
            .iter()
            .filter(|path| {
                let theirs = target.files.get(**path);
                theirs != fork_files.get(**path) && theirs != source.files.get(**path)
            })
            .map(|path| (*path).clone())
            .collect();
        if !conflicts.is_empty() {
            return Err(StoreError::MergeConflict {
                branch: branch.to_string(),
                base: base.to_string(),
                paths: conflicts,
            });
        }

        let changed_paths: Vec<String> = touched.into_iter().cloned().collect();
        let target = state.branch_mut(base)?;
        for path in &changed_paths {
            match source.files.get(path) {
                Some(content) => {
                    target.files.insert(path.clone(), content.clone());
                }
                None => {
                    target.files.remove(path);
                }
            }
        }
        target.head = commit_hash(Some(&target.head), &format!("merge {branch}: {title}"));
        let merged_head = target.head.clone();

        if let Ok(merged) = state.branch_mut(branch) {
            merged.fork = Some((base.to_string(), merged.files.clone()));
        }

        state.next_change += 1;
        let change_id = state.next_change;
        state.changes.push(ChangeRequest {
            id: change_id,
            branch: branch.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            changed_paths,
        });
        debug!(branch, base, change_id, "change merged");
        Ok(MergeReceipt {
            change_id,
            merged_head,
        })
    }
}

fn not_found(path: &str, reference: &str) -> StoreError {
    StoreError::NotFound {
        path: path.to_string(),
        reference: reference.to_string(),
    }
}

/// Domain-separated BLAKE3 hash of blob content.
fn blob_hash(content: &[u8]) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"rdb-blob-v1:");
    hasher.update(content);
    ContentHash::from_bytes(hasher.finalize().as_bytes())
}

fn commit_hash(parent: Option<&ContentHash>, message: &str) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"rdb-commit-v1:");
    if let Some(parent) = parent {
        hasher.update(parent.as_str().as_bytes());
    }
    hasher.update(b":");
    hasher.update(message.as_bytes());
    ContentHash::from_bytes(hasher.finalize().as_bytes())
}
