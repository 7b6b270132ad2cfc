use std::sync::Arc;

use rdb_store::{lock_path, validate_component, RemoteStoreClient, StoreError};
use rdb_types::{ContentHash, RdbError, RdbResult};
use tracing::{debug, warn};

use crate::config::TxnConfig;

/// Container-level mutual exclusion built on sentinel files.
///
/// A container is locked while `<Container>/<process>.lock` exists on the
/// base ref. Acquisition writes the sentinel with the store's
/// create-if-absent precondition, so of two racing callers exactly one
/// succeeds. Conflicts are reported, never retried.
#[derive(Clone)]
pub struct LockCoordinator {
    client: Arc<dyn RemoteStoreClient>,
    config: TxnConfig,
}

impl LockCoordinator {
    pub fn new(client: Arc<dyn RemoteStoreClient>, config: TxnConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Path of `container`'s sentinel.
    pub fn sentinel_path(&self, container: &str) -> String {
        lock_path(container, &self.config.process_name)
    }

    /// Whether `container` is locked on the base ref.
    pub async fn is_locked(&self, container: &str) -> RdbResult<bool> {
        self.is_locked_on(container, &self.config.base_ref).await
    }

    /// Whether `container`'s sentinel exists on `reference`.
    pub async fn is_locked_on(&self, container: &str, reference: &str) -> RdbResult<bool> {
        validate_component(container)?;
        let path = self.sentinel_path(container);
        Ok(self.client.file_exists(&path, reference).await?)
    }

    /// Take the lock on `container` and return the sentinel's content hash.
    ///
    /// Fails with [`RdbError::LockConflict`] if the sentinel already exists,
    /// whether it is seen by the pre-check or by the conditional write.
    pub async fn acquire(&self, container: &str) -> RdbResult<ContentHash> {
        if self.is_locked(container).await? {
            warn!(container, "lock conflict");
            return Err(RdbError::lock_conflict(container));
        }

        let path = self.sentinel_path(container);
        let message = self.config.message("lock", container);
        match self
            .client
            .put_file(&path, &[], &self.config.base_ref, &message, None)
            .await
        {
            Ok(hash) => {
                debug!(container, lock = %hash.short(), "lock acquired");
                Ok(hash)
            }
            Err(StoreError::Conflict { .. }) => {
                warn!(container, "lock conflict on create");
                Err(RdbError::lock_conflict(container))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete `container`'s sentinel on `branch` (if given) and on the base
    /// ref, using the hash recorded at acquisition.
    ///
    /// A sentinel that is already gone counts as released. Any other failure
    /// is [`RdbError::UnlockFailed`] naming the ref that still holds it.
    pub async fn release(
        &self,
        container: &str,
        lock_hash: &ContentHash,
        branch: Option<&str>,
    ) -> RdbResult<()> {
        let path = self.sentinel_path(container);
        let message = self.config.message("unlock", container);

        let mut refs = Vec::with_capacity(2);
        if let Some(branch) = branch {
            refs.push(branch);
        }
        refs.push(self.config.base_ref.as_str());

        for reference in refs {
            match self
                .client
                .delete_file(&path, reference, &message, lock_hash)
                .await
            {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => {
                    debug!(container, reference, "sentinel already absent");
                }
                Err(err) => {
                    warn!(container, reference, error = %err, "unlock failed");
                    return Err(RdbError::UnlockFailed {
                        container: container.to_string(),
                        branch: reference.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(container, "lock released");
        Ok(())
    }

    /// Delete `container`'s sentinel on the base ref whatever its hash.
    ///
    /// Operator escape hatch for locks left behind by a failed transaction.
    /// Returns `false` if the container was not locked.
    pub async fn force_unlock(&self, container: &str) -> RdbResult<bool> {
        validate_component(container)?;
        let path = self.sentinel_path(container);
        let current = match self.client.file_hash(&path, &self.config.base_ref).await {
            Ok(hash) => hash,
            Err(StoreError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        self.release(container, &current, None).await?;
        warn!(container, "lock force-released");
        Ok(true)
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
