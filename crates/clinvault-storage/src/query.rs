//! Store-level query predicate.
//!
//! A [`StoreQuery`] is everything a backend may filter on without inspecting
//! document structure: tenant, type, id allow-list, status, the `lastUpdated`
//! window and the extracted search index. Backends that cannot push a filter
//! down evaluate [`StoreQuery::matches`] per row.

use clinvault_core::TimeWindow;
use serde_json::Value;
use time::OffsetDateTime;

use crate::types::StoredResource;

/// Additional predicate on top of the key/status/time filters.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexFilter {
    /// Any value under the search-index key contains `value` (case-insensitive).
    Contains { key: String, value: String },
    /// `lastUpdated >= from`.
    LastUpdatedFrom(OffsetDateTime),
    /// The serialized document contains `value`. Used for reference fields,
    /// which are not indexed.
    DocumentContains(String),
}

impl IndexFilter {
    pub fn matches(&self, resource: &StoredResource) -> bool {
        match self {
            Self::Contains { key, value } => resource.search_index.contains(key, value),
            Self::LastUpdatedFrom(from) => resource.last_updated >= *from,
            Self::DocumentContains(value) => document_contains(&resource.document, value),
        }
    }
}

fn document_contains(document: &Value, needle: &str) -> bool {
    serde_json::to_string(document)
        .map(|raw| raw.contains(needle))
        .unwrap_or(false)
}

/// Predicate over the current version of every logical key in one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub tenant_id: String,
    /// `None` matches every type.
    pub resource_type: Option<String>,
    /// `None` matches every id.
    pub ids: Option<Vec<String>>,
    pub include_deleted: bool,
    pub window: Option<TimeWindow>,
    pub filters: Vec<IndexFilter>,
}

impl StoreQuery {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type: None,
            ids: None,
            include_deleted: false,
            window: None,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: IndexFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Tenant, type, id and status checks only.
    pub fn matches_key(&self, resource: &StoredResource) -> bool {
        resource.tenant_id == self.tenant_id
            && self
                .resource_type
                .as_ref()
                .is_none_or(|rt| *rt == resource.resource_type)
            && self
                .ids
                .as_ref()
                .is_none_or(|ids| ids.iter().any(|id| *id == resource.id))
            && (self.include_deleted || !resource.is_deleted())
    }

    pub fn matches(&self, resource: &StoredResource) -> bool {
        self.matches_key(resource)
            && self
                .window
                .as_ref()
                .is_none_or(|w| w.contains(resource.last_updated))
            && self.filters.iter().all(|f| f.matches(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceStatus;
    use clinvault_core::extract_search_index;
    use serde_json::json;
    use time::macros::datetime;

    fn row(tenant: &str, rt: &str, id: &str, document: Value) -> StoredResource {
        StoredResource {
            tenant_id: tenant.to_string(),
            resource_type: rt.to_string(),
            id: id.to_string(),
            version_id: 1,
            status: ResourceStatus::Active,
            search_index: extract_search_index(&document),
            document,
            last_updated: datetime!(2024-06-01 00:00:00 UTC),
            tags: Vec::new(),
            security_labels: Vec::new(),
            changed_by: "tester".to_string(),
        }
    }

    #[test]
    fn test_tenant_is_always_checked() {
        let r = row("a", "Patient", "p1", json!({"resourceType": "Patient"}));
        assert!(StoreQuery::new("a").matches(&r));
        assert!(!StoreQuery::new("b").matches(&r));
    }

    #[test]
    fn test_type_ids_and_status() {
        let mut r = row("a", "Patient", "p1", json!({"resourceType": "Patient"}));
        let q = StoreQuery::new("a").with_resource_type("Patient");
        assert!(q.matches(&r));
        assert!(!StoreQuery::new("a").with_resource_type("Observation").matches(&r));
        assert!(q.clone().with_ids(vec!["p1".into(), "p2".into()]).matches(&r));
        assert!(!q.clone().with_ids(vec!["p2".into()]).matches(&r));

        r.status = ResourceStatus::Deleted;
        assert!(!q.matches(&r));
        assert!(q.with_deleted(true).matches(&r));
    }

    #[test]
    fn test_window_and_filters() {
        let r = row(
            "a",
            "Observation",
            "o1",
            json!({
                "resourceType": "Observation",
                "code": {"coding": [{"code": "8867-4"}]},
                "subject": {"reference": "Patient/p1"}
            }),
        );
        let window = TimeWindow::new(Some(datetime!(2024-05-01 00:00:00 UTC)), None);
        assert!(StoreQuery::new("a").with_window(window).matches(&r));
        let later = TimeWindow::new(Some(datetime!(2024-07-01 00:00:00 UTC)), None);
        assert!(!StoreQuery::new("a").with_window(later).matches(&r));

        let code = IndexFilter::Contains {
            key: "code".into(),
            value: "8867".into(),
        };
        assert!(StoreQuery::new("a").with_filter(code).matches(&r));
        assert!(
            StoreQuery::new("a")
                .with_filter(IndexFilter::DocumentContains("Patient/p1".into()))
                .matches(&r)
        );
        assert!(
            !StoreQuery::new("a")
                .with_filter(IndexFilter::LastUpdatedFrom(datetime!(2025-01-01 00:00:00 UTC)))
                .matches(&r)
        );
    }
}
