//! Persistence contract for the versioned resource store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::query::StoreQuery;
use crate::types::{ResourceKey, StoredResource};

/// The trait every persistence backend implements.
///
/// Backends store immutable version rows. The only write is
/// [`insert_version`](Self::insert_version), which must be atomic and must
/// reject a second row with the same physical key: that uniqueness check is
/// what serialises concurrent writers of the same logical key.
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Atomically inserts one version row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::VersionConflict` if a row with the same
    /// `(tenant, type, id, version)` already exists.
    async fn insert_version(&self, row: StoredResource) -> Result<(), StorageError>;

    /// Returns the highest version of a logical key, whatever its status.
    async fn latest(&self, key: &ResourceKey) -> Result<Option<StoredResource>, StorageError>;

    /// Returns one specific version.
    async fn version(
        &self,
        key: &ResourceKey,
        version_id: u64,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Returns up to `limit` versions of a logical key, newest first.
    async fn versions(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<StoredResource>, StorageError>;

    /// Returns the current version of every logical key matching `query`.
    /// No ordering is guaranteed.
    async fn scan(&self, query: &StoreQuery) -> Result<Vec<StoredResource>, StorageError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shareable backend instance.
pub type DynBackend = Arc<dyn ResourceBackend>;
