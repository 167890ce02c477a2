//! # clinvault-storage
//!
//! Versioned resource store for Clinvault.
//!
//! A resource is an immutable JSON document keyed by
//! `(tenant, resourceType, id, versionId)`. Writes never touch an existing
//! version: update and delete append a new one, and the highest version of a
//! logical key is its current state.
//!
//! The crate is split into:
//! - [`ResourceBackend`], the persistence contract a backend implements. Its
//!   only write primitive is an atomic insert that enforces uniqueness of the
//!   physical key.
//! - [`ResourceStore`], the tenant-scoped service implementing create, update,
//!   upsert, read, version read, soft delete, history and listing on top of any
//!   backend.
//!
//! ## Example
//!
//! ```ignore
//! use clinvault_storage::ResourceStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = ResourceStore::new(backend);
//! let cancel = CancellationToken::new();
//! let created = store
//!     .create("tenant-a", "Patient", "p1", patient_json, "alice", &cancel)
//!     .await?;
//! assert_eq!(created.version_id, 1);
//! ```

mod error;
pub mod query;
mod store;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use query::{IndexFilter, StoreQuery};
pub use store::ResourceStore;
pub use traits::{DynBackend, ResourceBackend};
pub use types::{ResourceKey, ResourceStatus, StoredResource, UpsertOutcome, VersionKey};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
