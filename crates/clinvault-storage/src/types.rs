//! Storage types for the versioned resource store.

use std::fmt;

use clinvault_core::SearchIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Lifecycle status of a single version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    #[default]
    Active,
    Deleted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Logical key of a resource: `(tenant, resourceType, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub tenant_id: String,
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Physical key of `version_id` under this logical key.
    #[must_use]
    pub fn version(&self, version_id: u64) -> VersionKey {
        VersionKey {
            key: self.clone(),
            version_id,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.tenant_id, self.resource_type, self.id)
    }
}

/// Physical key of a resource version. Unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub key: ResourceKey,
    pub version_id: u64,
}

/// One immutable version of a resource as stored in the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResource {
    pub tenant_id: String,
    pub resource_type: String,
    pub id: String,
    pub version_id: u64,
    pub status: ResourceStatus,
    /// Full document, with `id` and `meta.versionId`/`meta.lastUpdated` set.
    pub document: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    pub search_index: SearchIndex,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_labels: Vec<String>,
    /// Actor that produced this version.
    pub changed_by: String,
}

impl StoredResource {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.tenant_id, &self.resource_type, &self.id)
    }

    #[must_use]
    pub fn version_key(&self) -> VersionKey {
        self.key().version(self.version_id)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == ResourceStatus::Deleted
    }

    /// Relative reference, `Type/id`.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}
