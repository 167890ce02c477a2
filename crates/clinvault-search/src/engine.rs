use std::collections::HashMap;

use clinvault_core::{TimeWindow, now_utc, parse_date_param, search_index, subject_id};
use clinvault_storage::{IndexFilter, ResourceStore, StorageError, StoreQuery, StoredResource};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::criteria::{ObservationFilter, SearchCriteria, SortOrder};

const OBSERVATION: &str = "Observation";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Used when the criteria carry no `maxResources`.
    pub default_max_resources: usize,
    /// Upper bound on any requested `maxResources`.
    pub hard_max_resources: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_resources: 1000,
            hard_max_resources: 10_000,
        }
    }
}

impl SearchConfig {
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_max_resources)
            .min(self.hard_max_resources)
    }
}

/// Outcome of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub entries: Vec<StoredResource>,
    /// Matches after per-subject limiting and before the final truncation.
    pub total_matched: usize,
    /// True when `maxResources` cut the result.
    pub truncated: bool,
}

/// Translates [`SearchCriteria`] into a store query and refines the rows.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    store: ResourceStore,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(store: ResourceStore) -> Self {
        Self::with_config(store, SearchConfig::default())
    }

    pub fn with_config(store: ResourceStore, config: SearchConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs a search inside one tenant.
    ///
    /// Per-subject limiting happens before sorting and truncation, so
    /// `maxResources` never decides which subjects are represented.
    pub async fn search(
        &self,
        tenant_id: &str,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, StorageError> {
        let rows = self.matching_rows(tenant_id, criteria, cancel).await?;
        let result = self.truncate(criteria, rows);

        tracing::debug!(
            tenant = %tenant_id,
            resource_type = criteria.resource_type.as_deref().unwrap_or("*"),
            total_matched = result.total_matched,
            returned = result.entries.len(),
            truncated = result.truncated,
            "search completed"
        );
        Ok(result)
    }

    /// Every match in final order, before the `maxResources` cut.
    ///
    /// Callers that drop rows afterwards (access filtering) do so here and
    /// then call [`truncate`](Self::truncate), so the cut only counts rows
    /// they keep.
    pub async fn matching_rows(
        &self,
        tenant_id: &str,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredResource>, StorageError> {
        let query = build_store_query(tenant_id, criteria);
        check_cancelled(cancel)?;

        let mut rows = self.store.scan(&query).await?;
        check_cancelled(cancel)?;
        tracing::trace!(tenant = %tenant_id, scanned = rows.len(), "store scan finished");

        let observation = &criteria.observation;
        if observation.is_active() {
            rows.retain(|row| matches_observation(row, observation));
        }
        if observation.limits_per_subject() {
            rows = limit_per_subject(rows, observation.per_subject_cap());
        }

        sort_rows(&mut rows, criteria.sort_order);
        Ok(rows)
    }

    /// Applies the effective `maxResources` to already ordered rows.
    pub fn truncate(&self, criteria: &SearchCriteria, mut rows: Vec<StoredResource>) -> SearchResult {
        let limit = self.config.effective_limit(criteria.max_resources);
        let total_matched = rows.len();
        let truncated = total_matched > limit;
        rows.truncate(limit);
        SearchResult {
            entries: rows,
            total_matched,
            truncated,
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), StorageError> {
    if cancel.is_cancelled() {
        Err(StorageError::Cancelled)
    } else {
        Ok(())
    }
}

// ============================================================================
// Store-level predicate
// ============================================================================

fn build_store_query(tenant_id: &str, criteria: &SearchCriteria) -> StoreQuery {
    let mut query = StoreQuery::new(tenant_id).with_deleted(criteria.include_deleted);
    query.resource_type = criteria.resource_type.clone();
    query.ids = criteria.fhir_ids.clone();

    query.window = TimeWindow::resolve(
        criteria.start_date,
        criteria.end_date,
        criteria.time_period.as_deref(),
        criteria.time_period_count,
        now_utc(),
    );

    for (name, value) in &criteria.search_parameters {
        if let Some(filter) = parameter_filter(name, value) {
            query.filters.push(filter);
        }
    }
    query
}

fn parameter_filter(name: &str, value: &str) -> Option<IndexFilter> {
    match name {
        search_index::IDENTIFIER | search_index::NAME | search_index::CODE | search_index::STATUS => {
            Some(IndexFilter::Contains {
                key: name.to_string(),
                value: value.to_string(),
            })
        }
        "subject" => Some(IndexFilter::DocumentContains(value.to_string())),
        search_index::DATE => match parse_date_param(value) {
            Ok(from) => Some(IndexFilter::LastUpdatedFrom(from)),
            Err(e) => {
                tracing::warn!(value, error = %e, "ignoring unparsable date parameter");
                None
            }
        },
        other => {
            tracing::debug!(parameter = other, "ignoring unknown search parameter");
            None
        }
    }
}

// ============================================================================
// In-memory refinement
// ============================================================================

/// Code and system are matched independently against every coding, so a
/// code from one coding and a system from another still match.
fn matches_observation(row: &StoredResource, filter: &ObservationFilter) -> bool {
    if row.resource_type != OBSERVATION {
        return false;
    }
    let document = &row.document;

    if let Some(code) = &filter.observation_code
        && !any_coding_field(document, "code", code)
    {
        return false;
    }
    if let Some(system) = &filter.observation_system
        && !any_coding_field(document, "system", system)
    {
        return false;
    }
    if let Some(patient) = &filter.patient_id {
        let reference = document
            .get("subject")
            .and_then(|s| s.get("reference"))
            .and_then(Value::as_str);
        if !reference.is_some_and(|r| r.contains(patient.as_str())) {
            return false;
        }
    }
    true
}

/// Malformed `code` elements simply do not match.
fn any_coding_field(document: &Value, field: &str, needle: &str) -> bool {
    document
        .get("code")
        .and_then(|c| c.get("coding"))
        .and_then(Value::as_array)
        .is_some_and(|codings| {
            codings.iter().any(|coding| {
                coding
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|v| v.contains(needle))
            })
        })
}

/// Keeps the `cap` most recent rows of each subject. Rows without a subject
/// form one group of their own.
fn limit_per_subject(rows: Vec<StoredResource>, cap: Option<usize>) -> Vec<StoredResource> {
    let Some(cap) = cap else {
        return rows;
    };

    let mut groups: HashMap<Option<String>, Vec<StoredResource>> = HashMap::new();
    for row in rows {
        groups.entry(subject_id(&row.document)).or_default().push(row);
    }

    groups
        .into_values()
        .flat_map(|mut group| {
            sort_rows(&mut group, SortOrder::Desc);
            group.truncate(cap);
            group
        })
        .collect()
}

fn sort_rows(rows: &mut [StoredResource], order: SortOrder) {
    rows.sort_by(|a, b| {
        let by_time = match order {
            SortOrder::Asc => a.last_updated.cmp(&b.last_updated),
            SortOrder::Desc => b.last_updated.cmp(&a.last_updated),
        };
        by_time
            .then_with(|| a.resource_type.cmp(&b.resource_type))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinvault_core::extract_search_index;
    use clinvault_db_memory::InMemoryBackend;
    use clinvault_storage::{ResourceBackend, ResourceStatus};
    use serde_json::json;
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};

    const TENANT: &str = "t1";

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        now: OffsetDateTime,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: Arc::new(InMemoryBackend::new()),
                now: now_utc(),
            }
        }

        fn engine(&self) -> SearchEngine {
            SearchEngine::new(ResourceStore::new(self.backend.clone()))
        }

        async fn put(&self, tenant: &str, document: Value, minutes_ago: i64) {
            let resource_type = document["resourceType"].as_str().unwrap().to_string();
            let id = document["id"].as_str().unwrap().to_string();
            let row = StoredResource {
                tenant_id: tenant.to_string(),
                resource_type,
                id,
                version_id: 1,
                status: ResourceStatus::Active,
                search_index: extract_search_index(&document),
                document,
                last_updated: self.now - Duration::minutes(minutes_ago),
                tags: Vec::new(),
                security_labels: Vec::new(),
                changed_by: "seed".to_string(),
            };
            self.backend.insert_version(row).await.unwrap();
        }

        async fn observation(&self, id: &str, patient: &str, code: &str, minutes_ago: i64) {
            self.put(
                TENANT,
                json!({
                    "resourceType": "Observation",
                    "id": id,
                    "status": "final",
                    "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
                    "subject": {"reference": format!("Patient/{patient}")}
                }),
                minutes_ago,
            )
            .await;
        }
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.entries.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_type_and_ids_filter() {
        let fx = Fixture::new();
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "p1"}), 3).await;
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "p2"}), 2).await;
        fx.observation("o1", "p1", "8867-4", 1).await;

        let engine = fx.engine();
        let cancel = CancellationToken::new();

        let patients = engine
            .search(TENANT, &SearchCriteria::for_type("Patient"), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&patients), vec!["p2", "p1"]);

        let only_p1 = engine
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_ids(["p1"]),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ids(&only_p1), vec!["p1"]);

        let everything = engine.search(TENANT, &SearchCriteria::new(), &cancel).await.unwrap();
        assert_eq!(everything.total_matched, 3);
    }

    #[tokio::test]
    async fn test_other_tenant_is_invisible() {
        let fx = Fixture::new();
        fx.put("other", json!({"resourceType": "Patient", "id": "p1"}), 1).await;

        let result = fx
            .engine()
            .search(TENANT, &SearchCriteria::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.entries.is_empty());
    }

    #[tokio::test]
    async fn test_search_parameters() {
        let fx = Fixture::new();
        fx.put(
            TENANT,
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "name": [{"family": "Smith", "given": ["Ann"]}],
                "identifier": [{"value": "MRN-001"}]
            }),
            5,
        )
        .await;
        fx.put(
            TENANT,
            json!({"resourceType": "Patient", "id": "p2", "name": [{"family": "Jones"}]}),
            120,
        )
        .await;
        fx.observation("o1", "p1", "8867-4", 1).await;

        let engine = fx.engine();
        let cancel = CancellationToken::new();

        let by_name = engine
            .search(TENANT, &SearchCriteria::new().with_param("name", "SMI"), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&by_name), vec!["p1"]);

        let by_identifier = engine
            .search(TENANT, &SearchCriteria::new().with_param("identifier", "mrn-0"), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&by_identifier), vec!["p1"]);

        let by_subject = engine
            .search(TENANT, &SearchCriteria::new().with_param("subject", "Patient/p1"), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&by_subject), vec!["o1"]);

        let an_hour_ago = format_rfc3339_minus(fx.now, 60);
        let recent = engine
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_param("date", an_hour_ago),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ids(&recent), vec!["p1"]);

        // Unparsable date and unknown parameters are ignored.
        let lenient = engine
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient")
                    .with_param("date", "yesterday-ish")
                    .with_param("favouriteColour", "blue"),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(lenient.total_matched, 2);
    }

    fn format_rfc3339_minus(now: OffsetDateTime, minutes: i64) -> String {
        clinvault_core::format_rfc3339(now - Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn test_time_window_explicit_and_relative() {
        let fx = Fixture::new();
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "recent"}), 60).await;
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "old"}), 60 * 24 * 10).await;

        let engine = fx.engine();
        let cancel = CancellationToken::new();

        let last_week = engine
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_relative_period("days", 7),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ids(&last_week), vec!["recent"]);

        // Explicit bounds take precedence over the relative period.
        let explicit = engine
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient")
                    .with_relative_period("days", 7)
                    .with_dates(
                        Some(fx.now - Duration::days(30)),
                        Some(fx.now - Duration::days(5)),
                    ),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ids(&explicit), vec!["old"]);
    }

    #[tokio::test]
    async fn test_unparsable_period_means_no_time_filter() {
        let fx = Fixture::new();
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "recent"}), 60).await;
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "old"}), 60 * 24 * 400).await;

        let result = fx
            .engine()
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_relative_period("fortnights", 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.total_matched, 2);
    }

    #[tokio::test]
    async fn test_huge_relative_count_matches_everything() {
        let fx = Fixture::new();
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "recent"}), 60).await;
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "old"}), 60 * 24 * 400).await;

        let result = fx
            .engine()
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_relative_period("days", 5_000_000),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.total_matched, 2);
    }

    #[tokio::test]
    async fn test_observation_code_system_and_patient() {
        let fx = Fixture::new();
        fx.observation("hr", "123", "8867-4", 1).await;
        fx.observation("bp", "123", "85354-9", 2).await;
        fx.observation("hr-other", "1234", "8867-4", 3).await;
        fx.put(
            TENANT,
            json!({"resourceType": "Observation", "id": "broken", "code": "not-an-object"}),
            4,
        )
        .await;
        fx.put(TENANT, json!({"resourceType": "Patient", "id": "123"}), 5).await;

        let engine = fx.engine();
        let cancel = CancellationToken::new();

        let heart_rate = ObservationFilter {
            observation_code: Some("8867".into()),
            ..Default::default()
        };
        let result = engine
            .search(TENANT, &SearchCriteria::new().with_observation(heart_rate), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["hr", "hr-other"]);

        let loinc = ObservationFilter {
            observation_system: Some("loinc".into()),
            ..Default::default()
        };
        let result = engine
            .search(TENANT, &SearchCriteria::new().with_observation(loinc), &cancel)
            .await
            .unwrap();
        assert_eq!(result.total_matched, 3);

        // Substring semantics: "123" also matches Patient/1234.
        let patient = ObservationFilter {
            patient_id: Some("123".into()),
            ..Default::default()
        };
        let result = engine
            .search(TENANT, &SearchCriteria::new().with_observation(patient), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["hr", "bp", "hr-other"]);
    }

    #[tokio::test]
    async fn test_max_per_subject_is_applied_before_truncation() {
        let fx = Fixture::new();
        // Patient a has the five most recent observations.
        for i in 0..5 {
            fx.observation(&format!("a{i}"), "a", "8867-4", i).await;
        }
        for i in 0..3 {
            fx.observation(&format!("b{i}"), "b", "8867-4", 10 + i).await;
        }

        let criteria = SearchCriteria::for_type("Observation")
            .with_observation(ObservationFilter {
                max_per_subject: Some(2),
                ..Default::default()
            })
            .with_max_resources(4);
        let result = fx
            .engine()
            .search(TENANT, &criteria, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a0", "a1", "b0", "b1"]);
        assert_eq!(result.total_matched, 4);
        assert!(!result.truncated);

        let mut per_subject: HashMap<String, usize> = HashMap::new();
        for row in &result.entries {
            *per_subject.entry(subject_id(&row.document).unwrap()).or_default() += 1;
        }
        assert!(per_subject.values().all(|&n| n <= 2));
    }

    #[tokio::test]
    async fn test_latest_only_and_sort_ascending() {
        let fx = Fixture::new();
        fx.observation("a-new", "a", "8867-4", 1).await;
        fx.observation("a-old", "a", "8867-4", 50).await;
        fx.observation("b-new", "b", "8867-4", 5).await;
        fx.observation("b-old", "b", "8867-4", 60).await;

        let criteria = SearchCriteria::new()
            .with_observation(ObservationFilter {
                latest_only: true,
                ..Default::default()
            })
            .with_sort_order(SortOrder::Asc);
        let result = fx
            .engine()
            .search(TENANT, &criteria, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["b-new", "a-new"]);
    }

    #[tokio::test]
    async fn test_max_resources_truncates_last() {
        let fx = Fixture::new();
        for i in 0..5 {
            fx.put(TENANT, json!({"resourceType": "Patient", "id": format!("p{i}")}), i).await;
        }

        let result = fx
            .engine()
            .search(
                TENANT,
                &SearchCriteria::for_type("Patient").with_max_resources(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["p0", "p1"]);
        assert_eq!(result.total_matched, 5);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_filtering_before_truncate_keeps_late_rows() {
        let fx = Fixture::new();
        for i in 0..5 {
            fx.put(TENANT, json!({"resourceType": "Patient", "id": format!("p{i}")}), i).await;
        }
        let engine = fx.engine();
        let criteria = SearchCriteria::for_type("Patient").with_max_resources(2);

        let mut rows = engine
            .matching_rows(TENANT, &criteria, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        rows.retain(|row| row.id != "p0" && row.id != "p1");

        let result = engine.truncate(&criteria, rows);
        assert_eq!(ids(&result), vec!["p2", "p3"]);
        assert_eq!(result.total_matched, 3);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_cancelled_search() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .engine()
            .search(TENANT, &SearchCriteria::new(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_effective_limit_is_capped() {
        let config = SearchConfig::default();
        assert_eq!(config.effective_limit(None), 1000);
        assert_eq!(config.effective_limit(Some(5)), 5);
        assert_eq!(config.effective_limit(Some(50_000)), 10_000);
    }

    #[test]
    fn test_deleted_rows_only_when_requested() {
        let fx = Fixture::new();
        tokio_test::block_on(async {
            fx.put(TENANT, json!({"resourceType": "Patient", "id": "p1"}), 2).await;
            let mut tombstone = fx
                .backend
                .latest(&clinvault_storage::ResourceKey::new(TENANT, "Patient", "p1"))
                .await
                .unwrap()
                .unwrap();
            tombstone.version_id = 2;
            tombstone.status = ResourceStatus::Deleted;
            fx.backend.insert_version(tombstone).await.unwrap();

            let engine = fx.engine();
            let cancel = CancellationToken::new();
            let hidden = engine
                .search(TENANT, &SearchCriteria::for_type("Patient"), &cancel)
                .await
                .unwrap();
            assert!(hidden.entries.is_empty());

            let shown = engine
                .search(TENANT, &SearchCriteria::for_type("Patient").with_deleted(true), &cancel)
                .await
                .unwrap();
            assert_eq!(shown.entries.len(), 1);
            assert!(shown.entries[0].is_deleted());
        });
    }
}
