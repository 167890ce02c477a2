//! Tenant-scoped versioned resource store.

use clinvault_core::{
    extract_search_index, extract_security_labels, extract_tags, format_rfc3339, now_utc,
    validate_id,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::query::StoreQuery;
use crate::traits::DynBackend;
use crate::types::{ResourceKey, ResourceStatus, StoredResource, UpsertOutcome};

/// Versioned document repository.
///
/// Every operation takes the tenant explicitly and only ever builds keys and
/// queries inside that tenant. Writes compute the next version from the
/// current one and hand a complete row to the backend's atomic insert, so a
/// cancelled or racing write is either fully visible or not at all.
#[derive(Clone)]
pub struct ResourceStore {
    backend: DynBackend,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl ResourceStore {
    pub fn new(backend: DynBackend) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    // ==================== Writes ====================

    /// Creates a logical key.
    ///
    /// A fresh key gets version 1. A key whose current version is deleted is
    /// re-activated with the next version number.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a live current version exists,
    /// `StorageError::VersionConflict` if a concurrent writer won the race and
    /// `StorageError::InvalidResource` for malformed documents.
    pub async fn create(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        document: Value,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<StoredResource, StorageError> {
        validate_document(resource_type, id, &document)?;
        let key = ResourceKey::new(tenant_id, resource_type, id);

        let next_version = match self.backend.latest(&key).await? {
            Some(current) if !current.is_deleted() => {
                return Err(StorageError::already_exists(resource_type, id));
            }
            Some(current) => current.version_id + 1,
            None => 1,
        };

        let row = build_row(&key, next_version, ResourceStatus::Active, document, actor);
        self.insert(row, cancel).await
    }

    /// Appends a new version to an existing logical key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the key has no version yet and
    /// `StorageError::VersionConflict` if a concurrent writer won the race.
    pub async fn update(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        document: Value,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<StoredResource, StorageError> {
        validate_document(resource_type, id, &document)?;
        let key = ResourceKey::new(tenant_id, resource_type, id);

        let current = self
            .backend
            .latest(&key)
            .await?
            .ok_or_else(|| StorageError::not_found(resource_type, id))?;

        let row = build_row(
            &key,
            current.version_id + 1,
            ResourceStatus::Active,
            document,
            actor,
        );
        self.insert(row, cancel).await
    }

    /// Creates the key if it is absent or deleted, updates it otherwise.
    pub async fn upsert(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        document: Value,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<(StoredResource, UpsertOutcome), StorageError> {
        match self.get(tenant_id, resource_type, id).await? {
            Some(_) => self
                .update(tenant_id, resource_type, id, document, actor, cancel)
                .await
                .map(|stored| (stored, UpsertOutcome::Updated)),
            None => self
                .create(tenant_id, resource_type, id, document, actor, cancel)
                .await
                .map(|stored| (stored, UpsertOutcome::Created)),
        }
    }

    /// Soft-deletes a logical key by appending a `deleted` version.
    ///
    /// Returns `false` if the key does not exist or is already deleted.
    pub async fn delete(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        let key = ResourceKey::new(tenant_id, resource_type, id);
        let current = match self.backend.latest(&key).await? {
            Some(current) if !current.is_deleted() => current,
            _ => return Ok(false),
        };

        let row = build_row(
            &key,
            current.version_id + 1,
            ResourceStatus::Deleted,
            current.document,
            actor,
        );
        self.insert(row, cancel).await?;
        Ok(true)
    }

    async fn insert(
        &self,
        row: StoredResource,
        cancel: &CancellationToken,
    ) -> Result<StoredResource, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        self.backend.insert_version(row.clone()).await?;
        tracing::debug!(
            tenant = %row.tenant_id,
            resource_type = %row.resource_type,
            id = %row.id,
            version = row.version_id,
            status = %row.status,
            "stored resource version"
        );
        Ok(row)
    }

    // ==================== Reads ====================

    /// Returns the current version if it is not deleted.
    pub async fn get(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let key = ResourceKey::new(tenant_id, resource_type, id);
        Ok(self
            .backend
            .latest(&key)
            .await?
            .filter(|current| !current.is_deleted()))
    }

    /// Returns one version regardless of its status.
    pub async fn get_version(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        version_id: u64,
    ) -> Result<Option<StoredResource>, StorageError> {
        let key = ResourceKey::new(tenant_id, resource_type, id);
        self.backend.version(&key, version_id).await
    }

    /// Returns up to `max_versions` versions, newest first.
    pub async fn history(
        &self,
        tenant_id: &str,
        resource_type: &str,
        id: &str,
        max_versions: usize,
    ) -> Result<Vec<StoredResource>, StorageError> {
        if max_versions == 0 {
            return Ok(Vec::new());
        }
        let key = ResourceKey::new(tenant_id, resource_type, id);
        self.backend.versions(&key, max_versions).await
    }

    /// Lists live current versions of one type, `lastUpdated` descending.
    pub async fn list(
        &self,
        tenant_id: &str,
        resource_type: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<StoredResource>, StorageError> {
        let query = StoreQuery::new(tenant_id).with_resource_type(resource_type);
        let mut rows = self.backend.scan(&query).await?;
        sort_newest_first(&mut rows);
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }

    /// Number of live logical keys, optionally restricted to one type.
    pub async fn count(
        &self,
        tenant_id: &str,
        resource_type: Option<&str>,
    ) -> Result<usize, StorageError> {
        let mut query = StoreQuery::new(tenant_id);
        query.resource_type = resource_type.map(str::to_string);
        Ok(self.backend.scan(&query).await?.len())
    }

    /// Runs a store-level query. Results are ordered `lastUpdated` descending.
    ///
    /// The query's tenant is the only tenant that can appear in the output.
    pub async fn scan(&self, query: &StoreQuery) -> Result<Vec<StoredResource>, StorageError> {
        let mut rows = self.backend.scan(query).await?;
        rows.retain(|row| row.tenant_id == query.tenant_id);
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

/// Sorts by `lastUpdated` descending with a stable tie-break on the key.
fn sort_newest_first(rows: &mut [StoredResource]) {
    rows.sort_by(|a, b| {
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| a.resource_type.cmp(&b.resource_type))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn validate_document(resource_type: &str, id: &str, document: &Value) -> Result<(), StorageError> {
    validate_id(id)?;
    let object = document
        .as_object()
        .ok_or_else(|| StorageError::invalid_resource("document must be a JSON object"))?;
    match object.get("resourceType").and_then(Value::as_str) {
        Some(rt) if rt == resource_type => Ok(()),
        Some(rt) => Err(StorageError::invalid_resource(format!(
            "resourceType '{rt}' does not match '{resource_type}'"
        ))),
        None => Err(StorageError::invalid_resource("missing resourceType field")),
    }
}

fn build_row(
    key: &ResourceKey,
    version_id: u64,
    status: ResourceStatus,
    mut document: Value,
    actor: &str,
) -> StoredResource {
    let now = now_utc();

    if let Some(obj) = document.as_object_mut() {
        obj.insert("id".to_string(), Value::String(key.id.clone()));
        let mut meta = match obj.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        meta.insert("versionId".to_string(), json!(version_id.to_string()));
        meta.insert("lastUpdated".to_string(), json!(format_rfc3339(now)));
        obj.insert("meta".to_string(), Value::Object(meta));
    }

    StoredResource {
        tenant_id: key.tenant_id.clone(),
        resource_type: key.resource_type.clone(),
        id: key.id.clone(),
        version_id,
        status,
        search_index: extract_search_index(&document),
        tags: extract_tags(&document),
        security_labels: extract_security_labels(&document),
        document,
        last_updated: now,
        changed_by: actor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_document() {
        let doc = json!({"resourceType": "Patient"});
        assert!(validate_document("Patient", "p1", &doc).is_ok());
        assert!(validate_document("Observation", "p1", &doc).is_err());
        assert!(validate_document("Patient", "bad id", &doc).is_err());
        assert!(validate_document("Patient", "p1", &json!({"name": "x"})).is_err());
        assert!(validate_document("Patient", "p1", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_build_row_injects_id_and_meta() {
        let key = ResourceKey::new("t", "Patient", "p1");
        let doc = json!({
            "resourceType": "Patient",
            "meta": {"tag": [{"system": "urn:s", "code": "vip"}], "versionId": "99"},
            "name": [{"family": "Doe"}]
        });
        let row = build_row(&key, 3, ResourceStatus::Active, doc, "alice");
        assert_eq!(row.document["id"], "p1");
        assert_eq!(row.document["meta"]["versionId"], "3");
        assert!(row.document["meta"]["lastUpdated"].is_string());
        assert_eq!(row.tags, vec!["urn:s|vip"]);
        assert!(row.search_index.contains("name", "doe"));
        assert_eq!(row.changed_by, "alice");
    }
}
