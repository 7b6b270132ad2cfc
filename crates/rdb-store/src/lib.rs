//! Remote store contract for RepoDB.
//!
//! RepoDB treats a hosted version-controlled repository as its only
//! persistence layer. This crate defines what RepoDB needs from that store
//! and ships an in-memory implementation for tests and embedding.
//!
//! # Contract
//!
//! [`RemoteStoreClient`] exposes file-level primitives only:
//!
//! - read a file's content and content hash at a ref
//! - write a file conditionally on its prior hash (or on its absence)
//! - delete a file conditionally on its prior hash
//! - create a branch from a ref
//! - open and merge a change request from a branch into a base ref
//!
//! Transport, authentication, and timeouts are the implementation's concern.
//!
//! # Layout
//!
//! See [`paths`]: one JSON array per container at
//! `<Container>/<Container>.json`, and a zero-length lock sentinel at
//! `<Container>/<process>.lock`.

pub mod error;
pub mod memory;
pub mod paths;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{ChangeRequest, InMemoryRemoteStore, StoreCall, StoreOp};
pub use paths::{container_path, lock_path, validate_component};
pub use traits::{BranchHandle, MergeReceipt, RemoteStoreClient};
