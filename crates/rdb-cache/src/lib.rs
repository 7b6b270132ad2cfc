//! Dependency-aware TTL cache for RepoDB.
//!
//! Reads in RepoDB go through a [`DependencyCache`]: a full container read is
//! cached under a root key, and every derived query result (lookups by name,
//! attribute filters, searches) is cached under its own key registered as a
//! dependent of that root. When a write completes, invalidating the root key
//! drops the container read and everything derived from it in one call.
//!
//! ```rust
//! use std::time::Duration;
//! use rdb_cache::DependencyCache;
//!
//! let cache = DependencyCache::new();
//! cache.insert("Companies:all", vec!["Acme"], &[]);
//! cache.insert("Companies:name:acme", vec!["Acme"], &["Companies:all"]);
//!
//! cache.invalidate("Companies:all");
//! assert!(cache.get("Companies:name:acme", Duration::from_secs(60)).is_none());
//! ```

pub mod cache;

pub use cache::{CacheEntry, CacheStats, DependencyCache};
