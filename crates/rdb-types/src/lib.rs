//! Foundation types for RepoDB.
//!
//! RepoDB stores small typed collections ("containers") as JSON blobs in a
//! remote version-controlled repository. This crate holds the types shared by
//! every layer; every other RepoDB crate depends on `rdb-types`.
//!
//! # Key Types
//!
//! - [`ObjectRecord`]: one entity with a unique name, timestamps and free attributes
//! - [`ContentHash`]: opaque content version reported by the remote store
//! - [`TransactionId`]: UUID v7 identifier for pipeline runs
//! - [`RdbError`] / [`ErrorKind`]: the error taxonomy
//! - [`AbortReport`]: operator context for an aborted transaction
//! - [`Outcome`] / [`Status`]: the uniform `(success, status, payload)` envelope

pub mod error;
pub mod hash;
pub mod id;
pub mod outcome;
pub mod record;

pub use error::{AbortReport, ErrorKind, RdbError, RdbResult};
pub use hash::ContentHash;
pub use id::TransactionId;
pub use outcome::{Outcome, Status};
pub use record::{is_reserved, name_key, names_equal, ObjectRecord, RESERVED_FIELDS};
