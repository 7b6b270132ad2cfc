use async_trait::async_trait;
use rdb_types::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A freshly created working branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHandle {
    /// Name chosen by the store.
    pub name: String,
    /// Head commit the branch was created at.
    pub head: ContentHash,
}

/// Result of merging a change request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReceipt {
    /// Store-assigned change request number.
    pub change_id: u64,
    /// Head of the base ref after the merge.
    pub merged_head: ContentHash,
}

/// Primitives RepoDB needs from a remote version-controlled store.
///
/// Every method is a network round-trip and therefore a suspension point.
/// Timeouts and authentication belong to the implementation.
///
/// Write preconditions follow the contents-API convention: `put_file` with
/// `expected = None` creates the file only if it is absent, and with
/// `Some(hash)` replaces it only if its current hash matches. A failed
/// precondition is [`StoreError::Conflict`].
#[async_trait]
pub trait RemoteStoreClient: Send + Sync {
    /// Content hash of the file at `path` on `reference`.
    ///
    /// Returns [`StoreError::NotFound`] if the file does not exist.
    async fn file_hash(&self, path: &str, reference: &str) -> StoreResult<ContentHash>;

    /// Raw content of the file at `path` on `reference`.
    async fn file_content(&self, path: &str, reference: &str) -> StoreResult<Vec<u8>>;

    /// Create or replace a file on `branch` and return its new content hash.
    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
        expected: Option<&ContentHash>,
    ) -> StoreResult<ContentHash>;

    /// Delete a file on `branch` if its current hash is `expected`.
    async fn delete_file(
        &self,
        path: &str,
        branch: &str,
        message: &str,
        expected: &ContentHash,
    ) -> StoreResult<()>;

    /// Create a new branch at the current head of `from_ref`.
    async fn create_branch(&self, from_ref: &str) -> StoreResult<BranchHandle>;

    /// Open a change request from `branch` into `base` and merge it.
    ///
    /// Returns [`StoreError::MergeConflict`] if the change cannot be merged.
    async fn create_and_merge_change(
        &self,
        branch: &str,
        base: &str,
        title: &str,
    ) -> StoreResult<MergeReceipt>;

    /// Whether `path` exists on `reference`.
    async fn file_exists(&self, path: &str, reference: &str) -> StoreResult<bool> {
        match self.file_hash(path, reference).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Content and hash of `path` on `reference`, or `None` if absent.
    ///
    /// The default implementation makes two calls; backends that return both
    /// in one response should override it.
    async fn read_file(
        &self,
        path: &str,
        reference: &str,
    ) -> StoreResult<Option<(Vec<u8>, ContentHash)>> {
        let hash = match self.file_hash(path, reference).await {
            Ok(hash) => hash,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let content = self.file_content(path, reference).await?;
        Ok(Some((content, hash)))
    }
}
