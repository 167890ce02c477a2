use std::collections::BTreeMap;
use std::time::Instant;

use clinvault_core::{format_rfc3339, generate_id, now_utc};
use clinvault_search::{SearchCriteria, SearchEngine, SearchResult};
use clinvault_storage::{ResourceStore, StoredResource, UpsertOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::BundleError;
use crate::import::{EntryOutcome, ImportResult};
use crate::model::{Bundle, BundleEntry, BundleEntryRequest, BundleType};

#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub default_bundle_type: BundleType,
    pub max_history_versions: usize,
    /// Only this many logical keys are expanded into their history.
    pub history_key_cap: usize,
    /// Entries past this position are recorded as failures.
    pub max_import_entries: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            default_bundle_type: BundleType::Collection,
            max_history_versions: 10,
            history_key_cap: 100,
            max_import_entries: 10_000,
        }
    }
}

/// Export request: search criteria plus bundle shaping options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleExportSpec {
    #[serde(flatten)]
    pub criteria: SearchCriteria,
    /// Free-form label; unknown values fall back to the configured default.
    pub bundle_type: Option<String>,
    pub include_history: bool,
    pub max_history_versions: Option<usize>,
}

impl BundleExportSpec {
    pub fn new(criteria: SearchCriteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bundle_type(mut self, bundle_type: impl Into<String>) -> Self {
        self.bundle_type = Some(bundle_type.into());
        self
    }

    #[must_use]
    pub fn with_history(mut self, max_versions: Option<usize>) -> Self {
        self.include_history = true;
        self.max_history_versions = max_versions;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_entries: usize,
    pub resource_counts: BTreeMap<String, usize>,
    pub duration_ms: u64,
    pub size_bytes: usize,
    /// The search hit `maxResources`.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct BundleExport {
    pub bundle: Bundle,
    pub metadata: ExportMetadata,
}

/// Assembles search results into bundles and ingests bundles back into the
/// store.
#[derive(Debug, Clone)]
pub struct BundleService {
    search: SearchEngine,
    config: BundleConfig,
}

impl BundleService {
    pub fn new(search: SearchEngine) -> Self {
        Self::with_config(search, BundleConfig::default())
    }

    pub fn with_config(search: SearchEngine, config: BundleConfig) -> Self {
        Self { search, config }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    fn store(&self) -> &ResourceStore {
        self.search.store()
    }

    // ==================== Export ====================

    pub async fn export(
        &self,
        tenant_id: &str,
        spec: &BundleExportSpec,
        cancel: &CancellationToken,
    ) -> Result<BundleExport, BundleError> {
        let started = Instant::now();
        let result = self.search.search(tenant_id, &spec.criteria, cancel).await?;
        self.assemble(tenant_id, spec, result, started, cancel).await
    }

    /// Builds the export from a search the caller already ran, for callers
    /// that filter the matches before the `maxResources` cut.
    pub async fn export_result(
        &self,
        tenant_id: &str,
        spec: &BundleExportSpec,
        result: SearchResult,
        cancel: &CancellationToken,
    ) -> Result<BundleExport, BundleError> {
        self.assemble(tenant_id, spec, result, Instant::now(), cancel)
            .await
    }

    async fn assemble(
        &self,
        tenant_id: &str,
        spec: &BundleExportSpec,
        result: SearchResult,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<BundleExport, BundleError> {
        let bundle_type = self.resolve_bundle_type(spec.bundle_type.as_deref());

        let versions = if spec.include_history {
            let max_versions = spec
                .max_history_versions
                .unwrap_or(self.config.max_history_versions);
            self.expand_history(
                tenant_id,
                result.entries,
                max_versions,
                spec.criteria.include_deleted,
                cancel,
            )
            .await?
        } else {
            result.entries
        };

        let mut resource_counts = BTreeMap::new();
        let entries: Vec<BundleEntry> = versions
            .into_iter()
            .map(|row| {
                *resource_counts.entry(row.resource_type.clone()).or_insert(0) += 1;
                if row.is_deleted() {
                    BundleEntry::tombstone(&row.resource_type, &row.id, row.version_id, row.document)
                } else {
                    BundleEntry::matched(&row.resource_type, &row.id, row.version_id, row.document)
                }
            })
            .collect();

        let bundle = Bundle::new(bundle_type, format_rfc3339(now_utc()), entries);
        let size_bytes = serde_json::to_vec(&bundle)?.len();

        let metadata = ExportMetadata {
            total_entries: bundle.entry.len(),
            resource_counts,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            size_bytes,
            truncated: result.truncated,
        };

        tracing::info!(
            tenant = %tenant_id,
            bundle_type = %bundle_type,
            entries = metadata.total_entries,
            size_bytes = metadata.size_bytes,
            duration_ms = metadata.duration_ms,
            truncated = metadata.truncated,
            "bundle exported"
        );

        Ok(BundleExport { bundle, metadata })
    }

    fn resolve_bundle_type(&self, requested: Option<&str>) -> BundleType {
        let Some(label) = requested else {
            return self.config.default_bundle_type;
        };
        label.parse().unwrap_or_else(|e: String| {
            tracing::warn!(
                requested = label,
                fallback = %self.config.default_bundle_type,
                error = %e,
                "unknown bundle type, using default"
            );
            self.config.default_bundle_type
        })
    }

    /// Replaces the first `history_key_cap` rows with their history, oldest
    /// version first so an import replays the writes in order. Later rows
    /// keep only the version the search returned.
    async fn expand_history(
        &self,
        tenant_id: &str,
        rows: Vec<StoredResource>,
        max_versions: usize,
        include_deleted: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredResource>, BundleError> {
        let mut expanded = Vec::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            if position >= self.config.history_key_cap {
                expanded.push(row);
                continue;
            }
            if cancel.is_cancelled() {
                return Err(BundleError::Cancelled);
            }
            let history = self
                .store()
                .history(tenant_id, &row.resource_type, &row.id, max_versions)
                .await?;
            expanded.extend(
                history
                    .into_iter()
                    .rev()
                    .filter(|version| include_deleted || !version.is_deleted()),
            );
        }
        Ok(expanded)
    }

    // ==================== Import ====================

    /// Upserts every entry of `bundle` in document order. Entries whose
    /// `request.method` is `DELETE` are replayed as deletes.
    ///
    /// Per-entry problems are recorded in the result and never abort the
    /// import. Only a bundle without an `entry` array fails as a whole.
    pub async fn import(
        &self,
        tenant_id: &str,
        bundle: &Value,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportResult, BundleError> {
        if let Some(rt) = bundle.get("resourceType").and_then(Value::as_str)
            && rt != "Bundle"
        {
            return Err(BundleError::validation(format!(
                "expected resourceType 'Bundle', got '{rt}'"
            )));
        }
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .ok_or_else(|| BundleError::validation("bundle has no entry array"))?;

        let mut result = ImportResult::default();
        for (index, entry) in entries.iter().enumerate() {
            if index >= self.config.max_import_entries {
                result.push(
                    index,
                    None,
                    None,
                    EntryOutcome::failed(format!(
                        "import limit of {} entries exceeded",
                        self.config.max_import_entries
                    )),
                );
                continue;
            }
            if cancel.is_cancelled() {
                result.push(index, None, None, EntryOutcome::failed("import cancelled"));
                continue;
            }
            self.import_entry(tenant_id, index, entry, actor, cancel, &mut result)
                .await;
        }

        tracing::info!(
            tenant = %tenant_id,
            total = result.total(),
            created = result.created(),
            updated = result.updated(),
            deleted = result.deleted(),
            failed = result.failed(),
            "bundle imported"
        );
        Ok(result)
    }

    async fn import_entry(
        &self,
        tenant_id: &str,
        index: usize,
        entry: &Value,
        actor: &str,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) {
        let Some(resource) = entry.get("resource").filter(|r| r.is_object()) else {
            result.push(index, None, None, EntryOutcome::failed("entry has no resource object"));
            return;
        };
        let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
            result.push(index, None, None, EntryOutcome::failed("resource has no resourceType"));
            return;
        };
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(generate_id);

        let replays_delete = entry
            .get("request")
            .and_then(|r| r.get("method"))
            .and_then(Value::as_str)
            .is_some_and(|m| m.eq_ignore_ascii_case(BundleEntryRequest::DELETE));
        if replays_delete {
            let outcome = match self
                .store()
                .delete(tenant_id, resource_type, &id, actor, cancel)
                .await
            {
                Ok(existed) => EntryOutcome::Deleted { existed },
                Err(e) => EntryOutcome::failed(e.to_string()),
            };
            result.push(index, Some(resource_type.to_string()), Some(id), outcome);
            return;
        }

        let outcome = match self
            .store()
            .upsert(tenant_id, resource_type, &id, resource.clone(), actor, cancel)
            .await
        {
            Ok((stored, UpsertOutcome::Created)) => EntryOutcome::Created {
                version: stored.version_id,
            },
            Ok((stored, UpsertOutcome::Updated)) => EntryOutcome::Updated {
                version: stored.version_id,
            },
            Err(e) => {
                tracing::debug!(
                    index,
                    resource_type,
                    id = %id,
                    category = %e.category(),
                    error = %e,
                    "bundle entry failed"
                );
                EntryOutcome::failed(e.to_string())
            }
        };
        result.push(index, Some(resource_type.to_string()), Some(id), outcome);
    }
}
