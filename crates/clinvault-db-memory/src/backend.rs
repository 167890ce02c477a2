use std::sync::Arc;

use async_trait::async_trait;
use clinvault_storage::{
    ResourceBackend, ResourceKey, StorageError, StoreQuery, StoredResource, VersionKey,
};
use papaya::HashMap as PapayaHashMap;

/// In-memory backend using papaya lock-free HashMaps.
///
/// - `rows` holds every version, keyed by its physical key. `try_insert` on
///   this map is the uniqueness constraint that serialises writers.
/// - `heads` points each logical key at its highest inserted version. It only
///   ever moves forward.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    rows: Arc<PapayaHashMap<VersionKey, StoredResource>>,
    heads: Arc<PapayaHashMap<ResourceKey, u64>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored version rows, across all tenants.
    pub fn row_count(&self) -> usize {
        self.rows.pin().len()
    }

    fn head(&self, key: &ResourceKey) -> Option<u64> {
        self.heads.pin().get(key).copied()
    }

    fn row(&self, key: &VersionKey) -> Option<StoredResource> {
        self.rows.pin().get(key).cloned()
    }
}

#[async_trait]
impl ResourceBackend for InMemoryBackend {
    async fn insert_version(&self, row: StoredResource) -> Result<(), StorageError> {
        let version_key = row.version_key();
        let version_id = row.version_id;

        // Guards are scoped so they are never held across an await.
        {
            let rows = self.rows.pin();
            if rows.try_insert(version_key.clone(), row).is_err() {
                return Err(StorageError::version_conflict(
                    &version_key.key.resource_type,
                    &version_key.key.id,
                    version_id,
                ));
            }
        }
        {
            let heads = self.heads.pin();
            heads.update_or_insert(
                version_key.key,
                |current| (*current).max(version_id),
                version_id,
            );
        }
        Ok(())
    }

    async fn latest(&self, key: &ResourceKey) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.head(key).and_then(|v| self.row(&key.version(v))))
    }

    async fn version(
        &self,
        key: &ResourceKey,
        version_id: u64,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.row(&key.version(version_id)))
    }

    async fn versions(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<StoredResource>, StorageError> {
        let Some(head) = self.head(key) else {
            return Ok(Vec::new());
        };
        let rows = self.rows.pin();
        Ok((1..=head)
            .rev()
            .filter_map(|v| rows.get(&key.version(v)).cloned())
            .take(limit)
            .collect())
    }

    async fn scan(&self, query: &StoreQuery) -> Result<Vec<StoredResource>, StorageError> {
        let heads = self.heads.pin();
        let rows = self.rows.pin();
        Ok(heads
            .iter()
            .filter(|(key, _)| {
                key.tenant_id == query.tenant_id
                    && query
                        .resource_type
                        .as_ref()
                        .is_none_or(|rt| *rt == key.resource_type)
            })
            .filter_map(|(key, version)| rows.get(&key.version(*version)))
            .filter(|row| query.matches(row))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory-papaya"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinvault_core::extract_search_index;
    use clinvault_storage::ResourceStatus;
    use serde_json::json;

    fn row(tenant: &str, id: &str, version_id: u64) -> StoredResource {
        let document = json!({"resourceType": "Patient", "id": id});
        StoredResource {
            tenant_id: tenant.to_string(),
            resource_type: "Patient".to_string(),
            id: id.to_string(),
            version_id,
            status: ResourceStatus::Active,
            search_index: extract_search_index(&document),
            document,
            last_updated: time::OffsetDateTime::now_utc(),
            tags: Vec::new(),
            security_labels: Vec::new(),
            changed_by: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_latest() {
        let backend = InMemoryBackend::new();
        backend.insert_version(row("t", "p1", 1)).await.unwrap();
        backend.insert_version(row("t", "p1", 2)).await.unwrap();

        let key = ResourceKey::new("t", "Patient", "p1");
        let latest = backend.latest(&key).await.unwrap().unwrap();
        assert_eq!(latest.version_id, 2);
        assert_eq!(backend.row_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_physical_key_is_rejected() {
        let backend = InMemoryBackend::new();
        backend.insert_version(row("t", "p1", 1)).await.unwrap();
        let err = backend.insert_version(row("t", "p1", 1)).await.unwrap_err();
        assert!(err.is_version_conflict());

        // Same id in another tenant is a different physical key.
        backend.insert_version(row("u", "p1", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_versions_newest_first_with_limit() {
        let backend = InMemoryBackend::new();
        for v in 1..=5 {
            backend.insert_version(row("t", "p1", v)).await.unwrap();
        }
        let key = ResourceKey::new("t", "Patient", "p1");
        let versions: Vec<u64> = backend
            .versions(&key, 3)
            .await
            .unwrap()
            .iter()
            .map(|r| r.version_id)
            .collect();
        assert_eq!(versions, vec![5, 4, 3]);

        let missing = ResourceKey::new("t", "Patient", "nope");
        assert!(backend.versions(&missing, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_returns_current_versions_of_one_tenant() {
        let backend = InMemoryBackend::new();
        backend.insert_version(row("t", "p1", 1)).await.unwrap();
        backend.insert_version(row("t", "p1", 2)).await.unwrap();
        backend.insert_version(row("t", "p2", 1)).await.unwrap();
        backend.insert_version(row("other", "p3", 1)).await.unwrap();

        let mut found = backend.scan(&StoreQuery::new("t")).await.unwrap();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        let found: Vec<(String, u64)> = found.into_iter().map(|r| (r.id, r.version_id)).collect();
        assert_eq!(found, vec![("p1".to_string(), 2), ("p2".to_string(), 1)]);
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(InMemoryBackend::new().backend_name(), "in-memory-papaya");
    }
}
