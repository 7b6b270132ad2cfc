//! Container locks and branch transactions for RepoDB.
//!
//! A write touches one or more containers. [`BranchTransaction`] makes it
//! isolated from other writers and invisible until complete:
//!
//! 1. **catch**: take every container's lock ([`LockCoordinator`]), create
//!    a working branch from the base ref, and load the containers from it
//!    into a [`RepoMetadata`].
//! 2. The caller edits the records in memory.
//! 3. **stage**: write the changed container blobs to the working branch,
//!    each conditional on the hash read in step 1.
//! 4. **release**: merge the branch into the base ref and remove the locks.
//!
//! Locks are whole-container. Two transactions over disjoint containers
//! proceed in parallel; overlapping ones fail fast with
//! [`rdb_types::RdbError::LockConflict`].

pub mod branch;
pub mod config;
pub mod lock;
pub mod metadata;

pub use branch::{decode_container, encode_container, BranchTransaction};
pub use config::TxnConfig;
pub use lock::LockCoordinator;
pub use metadata::{ContainerState, LockSet, RepoMetadata, TxnState};
