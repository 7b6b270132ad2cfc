//! Object repository for RepoDB.
//!
//! RepoDB stores named records in containers, one JSON array per container,
//! inside a hosted version-controlled repository. [`ObjectRepository`] is
//! the façade application code talks to:
//!
//! - reads (`get_all`, `find_by_name`, `find_by_attribute`, `search`) are
//!   served from a shared dependency-aware TTL cache
//! - writes (`create_many`, `batch_update`, `delete_one`, `link`, ...) run as
//!   a locked branch transaction driven by a step pipeline, and invalidate
//!   the cache once merged
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rdb_cache::DependencyCache;
//! use rdb_repo::{ContainerSchema, ObjectRepository, RepoConfig};
//! use rdb_store::InMemoryRemoteStore;
//! use rdb_types::ObjectRecord;
//!
//! # async fn demo() -> rdb_types::RdbResult<()> {
//! let store = Arc::new(InMemoryRemoteStore::default());
//! let cache = Arc::new(DependencyCache::new());
//! let companies = ObjectRepository::new(
//!     ContainerSchema::companies(),
//!     store,
//!     cache,
//!     RepoConfig::default(),
//! );
//! companies.create_one(ObjectRecord::new("Acme")).await?;
//! assert!(companies.find_by_name("acme").await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod query;
pub mod repository;
pub mod schema;

pub use config::RepoConfig;
pub use error::{ConfigError, ConfigResult};
pub use query::{SearchFilters, SearchOptions};
pub use repository::{
    root_key, ContainerSnapshot, DeleteScope, ObjectRepository, RecordUpdate, SharedCache,
};
pub use schema::{link_field, Caller, ContainerSchema};
