use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use clinvault_auth::scopes::{PATIENT_NAMESPACE, WILDCARD};
use clinvault_auth::{
    AccessLevel, AccessPolicy, AccessPolicyConfig, AuditAction, AuditEvent, AuditOutcome,
    AuditRecorder, AuditSink, DynGrantStorage, GrantRequest, PatientAccessGrant, Principal,
    RevokeTarget, Scope,
};
use clinvault_bundle::{
    BundleConfig, BundleError, BundleExport, BundleExportSpec, BundleService, BundleType,
    ImportResult,
};
use clinvault_config::AppConfig;
use clinvault_core::{generate_id, patient_compartment};
use clinvault_search::{SearchConfig, SearchCriteria, SearchEngine, SearchResult};
use clinvault_storage::{DynBackend, ResourceStore, StoredResource};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

const READ: &str = "read";
const WRITE: &str = "write";
const PATIENT: &str = "Patient";

type Result<T> = std::result::Result<T, ServiceError>;

/// How a principal reaches a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeAccess {
    /// A user or system scope covers the type.
    Scoped,
    /// Only patient scopes apply, so only patient compartments are reachable.
    CompartmentOnly,
}

fn type_access(principal: &Principal, resource_type: &str, action: &str) -> Option<TypeAccess> {
    let required = Scope::new(WILDCARD, resource_type, action);
    let (patient_scopes, other_scopes): (Vec<&Scope>, Vec<&Scope>) = principal
        .scopes
        .iter()
        .partition(|s| s.namespace == PATIENT_NAMESPACE);

    if other_scopes.iter().any(|s| s.covers(&required)) {
        Some(TypeAccess::Scoped)
    } else if patient_scopes
        .iter()
        .any(|s| s.action == WILDCARD || s.action == action)
    {
        Some(TypeAccess::CompartmentOnly)
    } else {
        None
    }
}

/// Orchestrates every request: scope check on the resource type, patient
/// compartment check through [`AccessPolicy`], the store, search or bundle
/// call, then an audit event.
#[derive(Debug, Clone)]
pub struct ClinicalRepository {
    store: ResourceStore,
    search: SearchEngine,
    bundles: BundleService,
    policy: AccessPolicy,
    audit: AuditRecorder,
}

impl ClinicalRepository {
    /// Default limits with audit events on the tracing sink.
    pub fn new(backend: DynBackend, grants: DynGrantStorage) -> Self {
        Self::assemble(
            ResourceStore::new(backend),
            grants,
            SearchConfig::default(),
            BundleConfig::default(),
            AccessPolicyConfig::default(),
            AuditRecorder::default(),
        )
    }

    pub fn from_config(
        config: &AppConfig,
        backend: DynBackend,
        grants: DynGrantStorage,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate().map_err(ServiceError::Configuration)?;
        let default_bundle_type: BundleType = config
            .bundle
            .default_bundle_type
            .parse()
            .map_err(ServiceError::Configuration)?;

        let search = SearchConfig {
            default_max_resources: config.search.default_max_resources,
            hard_max_resources: config.search.hard_max_resources,
        };
        let bundle = BundleConfig {
            default_bundle_type,
            max_history_versions: config.bundle.max_history_versions,
            history_key_cap: config.bundle.history_key_cap,
            max_import_entries: config.bundle.max_import_entries,
        };
        let access = AccessPolicyConfig {
            max_emergency_duration: time::Duration::hours(i64::from(
                config.access.max_emergency_duration_hours,
            )),
        };
        let audit = if config.audit.enabled {
            AuditRecorder::new(sink)
        } else {
            AuditRecorder::disabled()
        };

        Ok(Self::assemble(
            ResourceStore::new(backend),
            grants,
            search,
            bundle,
            access,
            audit,
        ))
    }

    fn assemble(
        store: ResourceStore,
        grants: DynGrantStorage,
        search: SearchConfig,
        bundle: BundleConfig,
        access: AccessPolicyConfig,
        audit: AuditRecorder,
    ) -> Self {
        let search = SearchEngine::with_config(store.clone(), search);
        let bundles = BundleService::with_config(search.clone(), bundle);
        let policy = AccessPolicy::with_config(store.clone(), grants, access);
        tracing::debug!(backend = store.backend_name(), "clinical repository ready");
        Self {
            store,
            search,
            bundles,
            policy,
            audit,
        }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    // ==================== Resources ====================

    /// Creates a resource, generating an id when none is given.
    ///
    /// A new `Patient` only needs a type scope: no grant can exist for a
    /// patient that is not stored yet.
    #[tracing::instrument(skip(self, principal, document, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn create(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: Option<&str>,
        document: Value,
        cancel: &CancellationToken,
    ) -> Result<StoredResource> {
        let id = id.map_or_else(generate_id, str::to_string);
        let event = event(principal, "resource.create", AuditAction::Create)
            .with_resource(resource_type, Some(id.clone()));
        let result = self
            .create_checked(principal, resource_type, &id, document, cancel)
            .await;
        self.audited(event, result).await
    }

    /// Appends a version. Both the current and the new document must be
    /// writable by the principal.
    #[tracing::instrument(skip(self, principal, document, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn update(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        document: Value,
        cancel: &CancellationToken,
    ) -> Result<StoredResource> {
        let event = event(principal, "resource.update", AuditAction::Update)
            .with_resource(resource_type, Some(id.to_string()));
        let result = self
            .update_checked(principal, resource_type, id, document, cancel)
            .await;
        self.audited(event, result).await
    }

    /// Soft-deletes a resource. `false` when there was nothing live to delete.
    #[tracing::instrument(skip(self, principal, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn delete(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let event = event(principal, "resource.delete", AuditAction::Delete)
            .with_resource(resource_type, Some(id.to_string()));
        let result = self
            .delete_checked(principal, resource_type, id, cancel)
            .await;
        self.audited(event, result).await
    }

    #[tracing::instrument(skip(self, principal), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn read(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>> {
        let event = event(principal, "resource.read", AuditAction::Read)
            .with_resource(resource_type, Some(id.to_string()));
        let result = self.read_checked(principal, resource_type, id, None).await;
        self.audited(event, result).await
    }

    /// Reads one version, deleted versions included.
    #[tracing::instrument(skip(self, principal), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn read_version(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        version_id: u64,
    ) -> Result<Option<StoredResource>> {
        let event = event(principal, "resource.vread", AuditAction::Read)
            .with_resource(resource_type, Some(id.to_string()));
        let result = self
            .read_checked(principal, resource_type, id, Some(version_id))
            .await;
        self.audited(event, result).await
    }

    /// History of one key, newest first. Every returned version must be
    /// readable, otherwise the whole call is forbidden.
    #[tracing::instrument(skip(self, principal), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn history(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        max_versions: usize,
    ) -> Result<Vec<StoredResource>> {
        let event = event(principal, "resource.history", AuditAction::Read)
            .with_resource(resource_type, Some(id.to_string()));
        let result = self
            .history_checked(principal, resource_type, id, max_versions)
            .await;
        self.audited(event, result).await
    }

    /// Live resources of one type, newest first, limited to what the
    /// principal may read.
    #[tracing::instrument(skip(self, principal), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn list(
        &self,
        principal: &Principal,
        resource_type: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<StoredResource>> {
        let event = event(principal, "resource.list", AuditAction::Read)
            .with_resource(resource_type, None);
        let result = self
            .list_checked(principal, resource_type, skip, take)
            .await;
        self.audited(event, result).await
    }

    // ==================== Search and bundles ====================

    /// Searches within the principal's tenant. Rows the principal may not
    /// read are removed before `maxResources` applies, so they neither take a
    /// slot nor count in `total_matched`.
    #[tracing::instrument(skip(self, principal, criteria, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn search(
        &self,
        principal: &Principal,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        let mut event = event(principal, "resource.search", AuditAction::Execute);
        if let Some(rt) = &criteria.resource_type {
            event = event.with_resource(rt, None);
        }
        let result = self.search_checked(principal, criteria, cancel).await;
        self.audited(event, result).await
    }

    /// Exports a bundle of what the principal may read. Metadata is
    /// recomputed when entries were removed.
    #[tracing::instrument(skip(self, principal, spec, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn export(
        &self,
        principal: &Principal,
        spec: &BundleExportSpec,
        cancel: &CancellationToken,
    ) -> Result<BundleExport> {
        let mut event = event(principal, "bundle.export", AuditAction::Execute);
        if let Some(rt) = &spec.criteria.resource_type {
            event = event.with_resource(rt, None);
        }
        let result = self.export_checked(principal, spec, cancel).await;
        self.audited(event, result).await
    }

    /// Imports a bundle. Import bypasses patient grants and therefore needs a
    /// system scope that allows writes.
    #[tracing::instrument(skip(self, principal, bundle, cancel), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn import(
        &self,
        principal: &Principal,
        bundle: &Value,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        let event = event(principal, "bundle.import", AuditAction::Execute);
        let result = self.import_checked(principal, bundle, cancel).await;
        self.audited(event, result).await
    }

    // ==================== Access grants ====================

    #[tracing::instrument(skip(self, principal, request), fields(tenant = %principal.tenant_id, user = %principal.user_id, patient_id = %request.patient_id))]
    pub async fn grant(
        &self,
        principal: &Principal,
        request: GrantRequest,
    ) -> Result<PatientAccessGrant> {
        let event = event(principal, "access.grant", AuditAction::Create)
            .with_resource(PATIENT, Some(request.patient_id.clone()));
        let result = self.grant_checked(principal, request).await;
        self.audited(event, result).await
    }

    /// Revokes grants. A grant id is resolved to its patient first so that
    /// `can_revoke` is checked against the right compartment.
    #[tracing::instrument(skip(self, principal), fields(tenant = %principal.tenant_id, user = %principal.user_id))]
    pub async fn revoke(
        &self,
        principal: &Principal,
        target: &RevokeTarget,
        reason: Option<&str>,
    ) -> Result<bool> {
        let result = self.revoke_checked(principal, target, reason).await;
        let mut event = event(principal, "access.revoke", AuditAction::Delete);
        if let Ok((patient_id, _)) = &result {
            event = event.with_resource(PATIENT, Some(patient_id.clone()));
        }
        self.audited(event, result.map(|(_, revoked)| revoked))
            .await
    }

    // ==================== Checked bodies ====================

    async fn create_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        document: Value,
        cancel: &CancellationToken,
    ) -> Result<StoredResource> {
        let access = authorize_type(principal, resource_type, WRITE)?;
        if resource_type == PATIENT {
            if access != TypeAccess::Scoped {
                return Err(ServiceError::unauthorized(
                    "creating patients requires a user or system scope",
                ));
            }
        } else {
            self.authorize_document(
                principal,
                access,
                resource_type,
                id,
                &document,
                AccessLevel::Write,
            )
            .await?;
        }
        Ok(self
            .store
            .create(
                &principal.tenant_id,
                resource_type,
                id,
                document,
                &principal.user_id,
                cancel,
            )
            .await?)
    }

    async fn update_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        document: Value,
        cancel: &CancellationToken,
    ) -> Result<StoredResource> {
        let access = authorize_type(principal, resource_type, WRITE)?;
        // The current version may be a tombstone, which update revives.
        let current = self
            .store
            .history(&principal.tenant_id, resource_type, id, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::not_found(resource_type, id))?;
        for doc in [&current.document, &document] {
            self.authorize_document(principal, access, resource_type, id, doc, AccessLevel::Write)
                .await?;
        }
        Ok(self
            .store
            .update(
                &principal.tenant_id,
                resource_type,
                id,
                document,
                &principal.user_id,
                cancel,
            )
            .await?)
    }

    async fn delete_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let access = authorize_type(principal, resource_type, WRITE)?;
        let Some(current) = self
            .store
            .get(&principal.tenant_id, resource_type, id)
            .await?
        else {
            return Ok(false);
        };
        self.authorize_document(
            principal,
            access,
            resource_type,
            id,
            &current.document,
            AccessLevel::Write,
        )
        .await?;
        Ok(self
            .store
            .delete(
                &principal.tenant_id,
                resource_type,
                id,
                &principal.user_id,
                cancel,
            )
            .await?)
    }

    async fn read_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        version_id: Option<u64>,
    ) -> Result<Option<StoredResource>> {
        let access = authorize_type(principal, resource_type, READ)?;
        let found = match version_id {
            Some(v) => {
                self.store
                    .get_version(&principal.tenant_id, resource_type, id, v)
                    .await?
            }
            None => self.store.get(&principal.tenant_id, resource_type, id).await?,
        };
        if let Some(row) = &found {
            self.authorize_document(
                principal,
                access,
                resource_type,
                id,
                &row.document,
                AccessLevel::Read,
            )
            .await?;
        }
        Ok(found)
    }

    async fn history_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        id: &str,
        max_versions: usize,
    ) -> Result<Vec<StoredResource>> {
        authorize_type(principal, resource_type, READ)?;
        let versions = self
            .store
            .history(&principal.tenant_id, resource_type, id, max_versions)
            .await?;
        let mut filter = ReadFilter::new(&self.policy, principal);
        for version in &versions {
            if !filter.allows(version).await? {
                return Err(ServiceError::forbidden(format!(
                    "history of {resource_type}/{id} is not readable"
                )));
            }
        }
        Ok(versions)
    }

    async fn list_checked(
        &self,
        principal: &Principal,
        resource_type: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<StoredResource>> {
        authorize_type(principal, resource_type, READ)?;
        let rows = self
            .store
            .list(&principal.tenant_id, resource_type, skip, take)
            .await?;
        ReadFilter::new(&self.policy, principal).retain(rows).await
    }

    async fn search_checked(
        &self,
        principal: &Principal,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        authorize_query(principal, criteria.resource_type.as_deref())?;
        self.readable_matches(principal, &self.search, criteria, cancel)
            .await
    }

    /// Runs `criteria`, drops unreadable rows, then applies `maxResources`,
    /// so hidden rows never take a slot in the result.
    async fn readable_matches(
        &self,
        principal: &Principal,
        engine: &SearchEngine,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        let rows = engine
            .matching_rows(&principal.tenant_id, criteria, cancel)
            .await?;
        let before = rows.len();
        let rows = ReadFilter::new(&self.policy, principal).retain(rows).await?;
        let hidden = before - rows.len();
        if hidden > 0 {
            tracing::debug!(hidden, "search rows hidden by access policy");
        }
        Ok(engine.truncate(criteria, rows))
    }

    async fn export_checked(
        &self,
        principal: &Principal,
        spec: &BundleExportSpec,
        cancel: &CancellationToken,
    ) -> Result<BundleExport> {
        authorize_query(principal, spec.criteria.resource_type.as_deref())?;
        let matches = self
            .readable_matches(principal, self.bundles.search_engine(), &spec.criteria, cancel)
            .await?;
        let mut export = self
            .bundles
            .export_result(&principal.tenant_id, spec, matches, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        // Older history versions can sit in another patient's compartment.
        let before = export.bundle.entry.len();
        let mut filter = ReadFilter::new(&self.policy, principal);
        let mut kept = Vec::with_capacity(before);
        for entry in std::mem::take(&mut export.bundle.entry) {
            let resource_type = entry.resource.get("resourceType").and_then(Value::as_str);
            let id = entry.resource.get("id").and_then(Value::as_str);
            let (Some(resource_type), Some(id)) = (resource_type, id) else {
                continue;
            };
            if filter
                .allows_document(resource_type, id, &entry.resource)
                .await?
            {
                kept.push(entry);
            }
        }
        export.bundle.entry = kept;

        let hidden = before - export.bundle.entry.len();
        if hidden > 0 {
            let mut resource_counts = BTreeMap::new();
            for entry in &export.bundle.entry {
                if let Some(rt) = entry.resource.get("resourceType").and_then(Value::as_str) {
                    *resource_counts.entry(rt.to_string()).or_insert(0) += 1;
                }
            }
            export.bundle.total = export.bundle.entry.len() as u64;
            export.metadata.total_entries = export.bundle.entry.len();
            export.metadata.resource_counts = resource_counts;
            export.metadata.size_bytes = serde_json::to_vec(&export.bundle)
                .map_err(BundleError::from)?
                .len();
            tracing::debug!(hidden, "bundle entries hidden by access policy");
        }
        Ok(export)
    }

    async fn import_checked(
        &self,
        principal: &Principal,
        bundle: &Value,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        if !principal.has_system_access(AccessLevel::Write) {
            return Err(ServiceError::unauthorized(
                "bundle import requires a system write scope",
            ));
        }
        Ok(self
            .bundles
            .import(&principal.tenant_id, bundle, &principal.user_id, cancel)
            .await?)
    }

    async fn grant_checked(
        &self,
        principal: &Principal,
        request: GrantRequest,
    ) -> Result<PatientAccessGrant> {
        if !self.policy.can_grant(principal, &request.patient_id).await? {
            return Err(ServiceError::forbidden(format!(
                "{} may not grant access to Patient/{}",
                principal.user_id, request.patient_id
            )));
        }
        Ok(self.policy.grant(principal, request).await?)
    }

    async fn revoke_checked(
        &self,
        principal: &Principal,
        target: &RevokeTarget,
        reason: Option<&str>,
    ) -> Result<(String, bool)> {
        let patient_id = match target {
            RevokeTarget::Grant(grant_id) => {
                self.policy
                    .grant_patient(&principal.tenant_id, *grant_id)
                    .await?
            }
            RevokeTarget::PatientUser { patient_id, .. } => patient_id.clone(),
        };
        if !self.policy.can_revoke(principal, &patient_id).await? {
            return Err(ServiceError::forbidden(format!(
                "{} may not revoke access to Patient/{patient_id}",
                principal.user_id
            )));
        }
        let revoked = self.policy.revoke(principal, target, reason).await?;
        Ok((patient_id, revoked))
    }

    // ==================== Helpers ====================

    async fn authorize_document(
        &self,
        principal: &Principal,
        access: TypeAccess,
        resource_type: &str,
        id: &str,
        document: &Value,
        level: AccessLevel,
    ) -> Result<()> {
        match patient_compartment(resource_type, id, document) {
            Some(patient_id) => {
                if self.policy.can_access(principal, &patient_id, level).await? {
                    Ok(())
                } else {
                    Err(ServiceError::forbidden(format!(
                        "no {level} access to Patient/{patient_id}"
                    )))
                }
            }
            None if access == TypeAccess::Scoped => Ok(()),
            None => Err(ServiceError::unauthorized(format!(
                "{resource_type}/{id} is outside any patient compartment"
            ))),
        }
    }

    async fn audited<T>(&self, event: AuditEvent, result: Result<T>) -> Result<T> {
        let event = match &result {
            Ok(_) => event,
            Err(e) => {
                tracing::debug!(event_type = %event.event_type, code = e.code(), error = %e, "request failed");
                event.with_outcome(AuditOutcome::failure(e.code()))
            }
        };
        self.audit.record(event).await;
        result
    }
}

fn event(principal: &Principal, event_type: &str, action: AuditAction) -> AuditEvent {
    AuditEvent::new(event_type, action, &principal.tenant_id, &principal.user_id)
}

fn authorize_type(principal: &Principal, resource_type: &str, action: &str) -> Result<TypeAccess> {
    type_access(principal, resource_type, action).ok_or_else(|| {
        ServiceError::unauthorized(format!("no scope covers {resource_type}.{action}"))
    })
}

/// Searches over one type need that type's read scope; type-less searches
/// need any scope that allows reads.
fn authorize_query(principal: &Principal, resource_type: Option<&str>) -> Result<()> {
    match resource_type {
        Some(rt) => authorize_type(principal, rt, READ).map(|_| ()),
        None if principal.has_scope(&Scope::new(WILDCARD, WILDCARD, READ)) => Ok(()),
        None => Err(ServiceError::unauthorized("no scope allows reads")),
    }
}

/// Read decisions for one result set, cached per type and per patient.
struct ReadFilter<'a> {
    policy: &'a AccessPolicy,
    principal: &'a Principal,
    types: HashMap<String, Option<TypeAccess>>,
    patients: HashMap<String, bool>,
}

impl<'a> ReadFilter<'a> {
    fn new(policy: &'a AccessPolicy, principal: &'a Principal) -> Self {
        Self {
            policy,
            principal,
            types: HashMap::new(),
            patients: HashMap::new(),
        }
    }

    async fn allows(&mut self, row: &StoredResource) -> Result<bool> {
        self.allows_document(&row.resource_type, &row.id, &row.document)
            .await
    }

    async fn allows_document(
        &mut self,
        resource_type: &str,
        id: &str,
        document: &Value,
    ) -> Result<bool> {
        let principal = self.principal;
        let access = *self
            .types
            .entry(resource_type.to_string())
            .or_insert_with(|| type_access(principal, resource_type, READ));
        let Some(access) = access else {
            return Ok(false);
        };

        match patient_compartment(resource_type, id, document) {
            Some(patient_id) => {
                if let Some(&allowed) = self.patients.get(&patient_id) {
                    return Ok(allowed);
                }
                let allowed = self
                    .policy
                    .can_access(principal, &patient_id, AccessLevel::Read)
                    .await?;
                self.patients.insert(patient_id, allowed);
                Ok(allowed)
            }
            None => Ok(access == TypeAccess::Scoped),
        }
    }

    async fn retain(&mut self, rows: Vec<StoredResource>) -> Result<Vec<StoredResource>> {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.allows(&row).await? {
                kept.push(row);
            }
        }
        Ok(kept)
    }
}
