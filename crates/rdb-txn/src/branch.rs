use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rdb_store::{container_path, MergeReceipt, RemoteStoreClient};
use rdb_types::{ContentHash, ObjectRecord, RdbError, RdbResult, TransactionId};
use tracing::{debug, info, warn};

use crate::config::TxnConfig;
use crate::lock::LockCoordinator;
use crate::metadata::{ContainerState, LockSet, RepoMetadata, TxnState};

/// Lock → branch → stage → merge → unlock protocol over a set of containers.
///
/// ```text
/// catch(["Companies", "Interactions"])     lock each, branch from base, read
///   mutate metadata.containers[..].objects in memory
/// stage(&mut metadata, "delete Acme")      write changed blobs to the branch
/// release(&mut metadata, "delete Acme")    merge, then unlock branch + base
/// ```
///
/// Failures before the merge should end in [`Self::abort`]. A failed merge
/// leaves every lock in place for an operator to resolve.
#[derive(Clone)]
pub struct BranchTransaction {
    client: Arc<dyn RemoteStoreClient>,
    locks: LockCoordinator,
}

impl BranchTransaction {
    pub fn new(client: Arc<dyn RemoteStoreClient>, config: TxnConfig) -> Self {
        let locks = LockCoordinator::new(client.clone(), config);
        Self { client, locks }
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    fn config(&self) -> &TxnConfig {
        self.locks.config()
    }

    // -----------------------------------------------------------------------
    // catch
    // -----------------------------------------------------------------------

    /// Lock every container, create a working branch, and load each
    /// container's records from it.
    ///
    /// Containers are locked in name order. If any is already locked the
    /// call fails with [`RdbError::LockConflict`]; locks this call took
    /// before the failure are released first. The same cleanup runs if
    /// branching or reading fails.
    pub async fn catch(&self, containers: &[&str]) -> RdbResult<RepoMetadata> {
        let names: BTreeSet<&str> = containers.iter().copied().collect();
        if names.is_empty() {
            return Err(RdbError::Validation(
                "a transaction needs at least one container".into(),
            ));
        }

        let id = TransactionId::new();
        let mut history = vec![TxnState::Idle, TxnState::LockCheck];
        debug!(txn = %id.short_id(), ?names, state = %TxnState::LockCheck, "checking locks");
        for name in &names {
            if self.locks.is_locked(name).await? {
                warn!(txn = %id.short_id(), container = *name, ?history, "container busy");
                return Err(RdbError::lock_conflict(*name));
            }
        }

        let mut held: BTreeMap<String, ContentHash> = BTreeMap::new();
        for name in &names {
            match self.locks.acquire(name).await {
                Ok(hash) => {
                    held.insert((*name).to_string(), hash);
                }
                Err(err) => return Err(self.unwind(&held, None, &history, err).await),
            }
        }
        history.push(TxnState::Locked);
        debug!(txn = %id.short_id(), state = %TxnState::Locked, "locks held");

        let branch = match self.client.create_branch(&self.config().base_ref).await {
            Ok(branch) => branch,
            Err(err) => return Err(self.unwind(&held, None, &history, err.into()).await),
        };

        let mut loaded = BTreeMap::new();
        for (name, lock_hash) in &held {
            match self.load(name, &branch.name).await {
                Ok((objects, blob_hash)) => {
                    loaded.insert(
                        name.clone(),
                        ContainerState::new(objects, blob_hash, lock_hash.clone()),
                    );
                }
                Err(err) => {
                    return Err(self
                        .unwind(&held, Some(branch.name.as_str()), &history, err)
                        .await)
                }
            }
        }
        history.push(TxnState::Branched);

        info!(
            txn = %id.short_id(),
            branch = %branch.name,
            containers = ?held.keys().collect::<Vec<_>>(),
            "transaction caught"
        );
        Ok(RepoMetadata {
            id,
            branch: branch.name,
            head: branch.head,
            base_ref: self.config().base_ref.clone(),
            containers: loaded,
            state: TxnState::Branched,
            history,
            receipt: None,
        })
    }

    /// Release locks taken by a failed `catch`; the triggering error wins
    /// unless cleanup itself fails.
    async fn unwind(
        &self,
        held: &BTreeMap<String, ContentHash>,
        branch: Option<&str>,
        history: &[TxnState],
        err: RdbError,
    ) -> RdbError {
        let mut cleanup_error = None;
        for (name, hash) in held {
            if let Err(unlock_err) = self.locks.release(name, hash, branch).await {
                cleanup_error.get_or_insert(unlock_err);
            }
        }
        match cleanup_error {
            Some(unlock_err) => {
                warn!(cause = %err, ?history, "catch failed and left locks behind");
                unlock_err
            }
            None => {
                debug!(cause = %err, ?history, "catch unwound");
                err
            }
        }
    }

    async fn load(
        &self,
        container: &str,
        branch: &str,
    ) -> RdbResult<(Vec<ObjectRecord>, Option<ContentHash>)> {
        let path = container_path(container);
        match self.client.read_file(&path, branch).await? {
            Some((bytes, hash)) => Ok((decode_container(container, &bytes)?, Some(hash))),
            None => Ok((Vec::new(), None)),
        }
    }

    // -----------------------------------------------------------------------
    // stage
    // -----------------------------------------------------------------------

    /// Write every changed container's blob to the working branch.
    ///
    /// Each write is conditional on the blob hash read by `catch` (or on the
    /// blob being absent). Returns the containers written.
    pub async fn stage(&self, meta: &mut RepoMetadata, summary: &str) -> RdbResult<Vec<String>> {
        expect_state(meta, &[TxnState::Branched, TxnState::Staged], "stage")?;

        let dirty = meta.dirty_containers();
        let branch = meta.branch.clone();
        for name in &dirty {
            let message = format!("{}: {summary}", self.config().message("update", name));
            let path = container_path(name);
            let container = meta.container_mut(name)?;
            let bytes = encode_container(name, &container.objects)?;
            let hash = self
                .client
                .put_file(
                    &path,
                    &bytes,
                    &branch,
                    &message,
                    container.blob_hash.as_ref(),
                )
                .await?;
            debug!(
                container = %name,
                blob = %hash.short(),
                records = container.objects.len(),
                "container staged"
            );
            container.mark_written(hash);
        }

        meta.advance(TxnState::Staged);
        Ok(dirty)
    }

    // -----------------------------------------------------------------------
    // release
    // -----------------------------------------------------------------------

    /// Merge the working branch into the base ref, then remove every lock on
    /// both refs.
    ///
    /// A failed merge attempts no unlock: the state becomes
    /// [`TxnState::FailedMerge`] and the error names the branch and the
    /// containers still locked.
    pub async fn release(&self, meta: &mut RepoMetadata, title: &str) -> RdbResult<MergeReceipt> {
        expect_state(meta, &[TxnState::Branched, TxnState::Staged], "release")?;
        meta.advance(TxnState::Merging);

        let title = format!("{}: {title}", self.config().commit_prefix);
        let receipt = match self
            .client
            .create_and_merge_change(&meta.branch, &meta.base_ref, &title)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                meta.advance(TxnState::FailedMerge);
                let containers = meta.container_names();
                warn!(
                    txn = %meta.id.short_id(),
                    branch = %meta.branch,
                    ?containers,
                    error = %err,
                    "merge failed; locks left in place"
                );
                return Err(RdbError::MergeFailed {
                    branch: meta.branch.clone(),
                    containers,
                    reason: err.to_string(),
                });
            }
        };
        meta.receipt = Some(receipt.clone());

        let mut first_error = None;
        for (name, container) in &meta.containers {
            if let Err(err) = self
                .locks
                .release(name, &container.lock_hash, Some(meta.branch.as_str()))
                .await
            {
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        meta.advance(TxnState::Released);
        info!(
            txn = %meta.id.short_id(),
            branch = %meta.branch,
            change = receipt.change_id,
            "transaction released"
        );
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // abort
    // -----------------------------------------------------------------------

    /// Remove the base-ref locks of a transaction that will not be merged.
    ///
    /// The working branch is left as is. Returns the containers whose lock
    /// could not be removed.
    pub async fn abort(&self, locks: &LockSet) -> Vec<String> {
        let mut stuck = Vec::new();
        for (name, hash) in &locks.locks {
            if let Err(err) = self.locks.release(name, hash, None).await {
                warn!(container = %name, branch = %locks.branch, error = %err, "abort could not unlock");
                stuck.push(name.clone());
            }
        }
        warn!(branch = %locks.branch, still_locked = ?stuck, "transaction aborted");
        stuck
    }

    /// [`Self::abort`] for a transaction whose metadata is still at hand.
    pub async fn abort_metadata(&self, meta: &mut RepoMetadata) -> Vec<String> {
        let stuck = self.abort(&meta.lock_set()).await;
        meta.advance(TxnState::Aborted);
        stuck
    }
}

impl std::fmt::Debug for BranchTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTransaction")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

fn expect_state(meta: &RepoMetadata, allowed: &[TxnState], op: &str) -> RdbResult<()> {
    if allowed.contains(&meta.state) {
        Ok(())
    } else {
        Err(RdbError::Validation(format!(
            "cannot {op} transaction on branch '{}' in state {}",
            meta.branch, meta.state
        )))
    }
}

/// Decode a container blob. A zero-length blob is an empty container.
pub fn decode_container(container: &str, bytes: &[u8]) -> RdbResult<Vec<ObjectRecord>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| RdbError::Serialization(format!("container '{container}': {e}")))
}

/// Encode a container blob as a pretty-printed JSON array.
pub fn encode_container(container: &str, objects: &[ObjectRecord]) -> RdbResult<Vec<u8>> {
    serde_json::to_vec_pretty(objects)
        .map_err(|e| RdbError::Serialization(format!("container '{container}': {e}")))
}
