//! Grant storage trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::AuthResult;
use crate::grants::{PatientAccessGrant, RevokeTarget};

/// Filter for listing grants. The tenant is always required.
#[derive(Debug, Clone, Default)]
pub struct GrantQuery {
    pub tenant_id: String,
    pub patient_id: Option<String>,
    pub user_id: Option<String>,
}

impl GrantQuery {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn matches(&self, grant: &PatientAccessGrant) -> bool {
        grant.tenant_id == self.tenant_id
            && self.patient_id.as_ref().is_none_or(|p| *p == grant.patient_id)
            && self.user_id.as_ref().is_none_or(|u| *u == grant.user_id)
    }
}

/// Persistence for [`PatientAccessGrant`]s.
///
/// Each method is atomic with respect to the others.
#[async_trait]
pub trait GrantStorage: Send + Sync {
    /// Stores `grant`, or refreshes the active grant of the same
    /// `(tenant, patient, user, level)` tuple in place, keeping its id.
    ///
    /// Returns the stored grant.
    async fn upsert_active(&self, grant: PatientAccessGrant) -> AuthResult<PatientAccessGrant>;

    /// Returns a grant by id, scoped to the tenant.
    async fn get(&self, tenant_id: &str, id: Uuid) -> AuthResult<Option<PatientAccessGrant>>;

    /// Returns every grant matching `query`, active or not, oldest first.
    async fn list(&self, query: &GrantQuery) -> AuthResult<Vec<PatientAccessGrant>>;

    /// Soft-revokes the effective grants addressed by `target`. Grants that
    /// already expired at `now` are left untouched.
    ///
    /// Returns how many grants were revoked.
    async fn revoke(
        &self,
        tenant_id: &str,
        target: &RevokeTarget,
        revoked_by: &str,
        reason: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<usize>;
}

pub type DynGrantStorage = Arc<dyn GrantStorage>;

#[derive(Debug, Default)]
pub struct InMemoryGrantStorage {
    grants: RwLock<HashMap<Uuid, PatientAccessGrant>>,
}

impl InMemoryGrantStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStorage for InMemoryGrantStorage {
    async fn upsert_active(&self, grant: PatientAccessGrant) -> AuthResult<PatientAccessGrant> {
        let mut grants = self.grants.write().await;

        if let Some(existing) = grants
            .values_mut()
            .find(|g| g.is_active && g.same_tuple(&grant))
        {
            existing.granted_by = grant.granted_by;
            existing.reason = grant.reason;
            existing.granted_at = grant.granted_at;
            existing.expires_at = grant.expires_at;
            existing.is_emergency_access = grant.is_emergency_access;
            existing.emergency_justification = grant.emergency_justification;
            return Ok(existing.clone());
        }

        grants.insert(grant.id, grant.clone());
        Ok(grant)
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> AuthResult<Option<PatientAccessGrant>> {
        let grants = self.grants.read().await;
        Ok(grants.get(&id).filter(|g| g.tenant_id == tenant_id).cloned())
    }

    async fn list(&self, query: &GrantQuery) -> AuthResult<Vec<PatientAccessGrant>> {
        let grants = self.grants.read().await;
        let mut found: Vec<PatientAccessGrant> =
            grants.values().filter(|g| query.matches(g)).cloned().collect();
        found.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn revoke(
        &self,
        tenant_id: &str,
        target: &RevokeTarget,
        revoked_by: &str,
        reason: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<usize> {
        let mut grants = self.grants.write().await;
        let mut revoked = 0;
        for grant in grants.values_mut() {
            let addressed = grant.tenant_id == tenant_id
                && match target {
                    RevokeTarget::Grant(id) => grant.id == *id,
                    RevokeTarget::PatientUser {
                        patient_id,
                        user_id,
                    } => grant.patient_id == *patient_id && grant.user_id == *user_id,
                };
            if addressed && grant.is_effective(now) {
                grant.revoke(revoked_by, reason, now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
