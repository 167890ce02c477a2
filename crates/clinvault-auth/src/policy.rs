//! Patient access policy.
//!
//! Access is resolved from the principal's scopes first and from stored
//! grants second:
//!
//! 1. any `system/...` scope allows everything;
//! 2. `patient/*` allows any patient the user holds an effective grant for;
//! 3. `patient/{id}.*` allows that patient when an effective grant satisfies
//!    the required level.
//!
//! Expiry is evaluated at check time against the grant's `expiresAt`.

use clinvault_core::now_utc;
use clinvault_storage::ResourceStore;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::grants::{AccessLevel, GrantRequest, PatientAccessGrant, RevokeTarget};
use crate::principal::{Principal, Role};
use crate::storage::{DynGrantStorage, GrantQuery};

const PATIENT: &str = "Patient";

#[derive(Debug, Clone)]
pub struct AccessPolicyConfig {
    /// Expiry applied to emergency grants that do not carry one.
    pub max_emergency_duration: Duration,
}

impl Default for AccessPolicyConfig {
    fn default() -> Self {
        Self {
            max_emergency_duration: Duration::hours(24),
        }
    }
}

#[derive(Clone)]
pub struct AccessPolicy {
    store: ResourceStore,
    grants: DynGrantStorage,
    config: AccessPolicyConfig,
}

impl std::fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessPolicy {
    pub fn new(store: ResourceStore, grants: DynGrantStorage) -> Self {
        Self::with_config(store, grants, AccessPolicyConfig::default())
    }

    pub fn with_config(
        store: ResourceStore,
        grants: DynGrantStorage,
        config: AccessPolicyConfig,
    ) -> Self {
        Self {
            store,
            grants,
            config,
        }
    }

    // ==================== Checks ====================

    /// Decides whether `principal` may touch `patient_id` at `required`.
    ///
    /// Denial is `Ok(false)`. Errors only come from grant storage.
    pub async fn can_access(
        &self,
        principal: &Principal,
        patient_id: &str,
        required: AccessLevel,
    ) -> AuthResult<bool> {
        if principal.has_system_access(required) {
            return Ok(true);
        }

        let wildcard = principal.scopes.iter().any(|s| s.is_patient_wildcard());
        let exact = principal.scopes.iter().any(|s| s.names_patient(patient_id));
        if !wildcard && !exact {
            return Ok(false);
        }

        let now = now_utc();
        let grants = self
            .grants
            .list(
                &GrantQuery::new(&principal.tenant_id)
                    .with_patient(patient_id)
                    .with_user(&principal.user_id),
            )
            .await?;
        let mut effective = grants.iter().filter(|g| g.is_effective(now));

        // `patient/*` accepts any effective grant, since every level satisfies Read.
        Ok(if wildcard {
            effective.next().is_some()
        } else {
            effective.any(|g| g.satisfies(required))
        })
    }

    /// SystemAdmin always; HealthcareProvider for patients it can read.
    pub async fn can_grant(&self, principal: &Principal, patient_id: &str) -> AuthResult<bool> {
        match principal.role {
            Role::SystemAdmin => Ok(true),
            Role::HealthcareProvider => {
                self.can_access(principal, patient_id, AccessLevel::Read).await
            }
            Role::Patient | Role::Auditor => Ok(false),
        }
    }

    /// Same rule as [`can_grant`](Self::can_grant).
    pub async fn can_revoke(&self, principal: &Principal, patient_id: &str) -> AuthResult<bool> {
        self.can_grant(principal, patient_id).await
    }

    // ==================== Grants ====================

    /// Grants access, refreshing an existing active grant of the same
    /// `(patient, user, level)`.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotFound` if the patient does not exist in the tenant.
    /// - `AuthError::Validation` for an emergency grant without justification
    ///   or an expiry in the past.
    pub async fn grant(
        &self,
        principal: &Principal,
        request: GrantRequest,
    ) -> AuthResult<PatientAccessGrant> {
        let now = now_utc();
        let tenant_id = &principal.tenant_id;

        if request.user_id.trim().is_empty() {
            return Err(AuthError::validation("user id must not be empty"));
        }
        if request.expires_at.is_some_and(|expires| expires <= now) {
            return Err(AuthError::validation("expiry must be in the future"));
        }
        let is_emergency = request.is_emergency || request.access_level == AccessLevel::Emergency;
        let justification = request
            .emergency_justification
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty());
        if is_emergency && justification.is_none() {
            return Err(AuthError::validation(
                "emergency access requires a justification",
            ));
        }

        if self
            .store
            .get(tenant_id, PATIENT, &request.patient_id)
            .await?
            .is_none()
        {
            return Err(AuthError::not_found(PATIENT, &request.patient_id));
        }

        let expires_at = match request.expires_at {
            None if is_emergency => Some(now + self.config.max_emergency_duration),
            other => other,
        };

        let grant = PatientAccessGrant {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.clone(),
            patient_id: request.patient_id,
            user_id: request.user_id,
            access_level: request.access_level,
            granted_by: principal.user_id.clone(),
            reason: request.reason,
            granted_at: now,
            expires_at,
            is_emergency_access: is_emergency,
            emergency_justification: justification.map(str::to_string),
            is_active: true,
            revoked_by: None,
            revoked_at: None,
            revocation_reason: None,
        };
        let stored = self.grants.upsert_active(grant).await?;

        if stored.is_emergency_access {
            tracing::warn!(
                tenant = %stored.tenant_id,
                patient_id = %stored.patient_id,
                user_id = %stored.user_id,
                granted_by = %stored.granted_by,
                justification = stored.emergency_justification.as_deref().unwrap_or_default(),
                expires_at = ?stored.expires_at,
                "emergency access granted"
            );
        } else {
            tracing::info!(
                tenant = %stored.tenant_id,
                patient_id = %stored.patient_id,
                user_id = %stored.user_id,
                level = %stored.access_level,
                granted_by = %stored.granted_by,
                "patient access granted"
            );
        }
        Ok(stored)
    }

    /// Soft-revokes the addressed grants. `false` when nothing active matched.
    pub async fn revoke(
        &self,
        principal: &Principal,
        target: &RevokeTarget,
        reason: Option<&str>,
    ) -> AuthResult<bool> {
        let revoked = self
            .grants
            .revoke(
                &principal.tenant_id,
                target,
                &principal.user_id,
                reason,
                now_utc(),
            )
            .await?;
        if revoked > 0 {
            tracing::info!(
                tenant = %principal.tenant_id,
                revoked_by = %principal.user_id,
                target = ?target,
                revoked,
                "patient access revoked"
            );
        }
        Ok(revoked > 0)
    }

    /// Resolves the patient a grant id points at, for `can_revoke` checks.
    pub async fn grant_patient(&self, tenant_id: &str, grant_id: Uuid) -> AuthResult<String> {
        self.grants
            .get(tenant_id, grant_id)
            .await?
            .map(|g| g.patient_id)
            .ok_or_else(|| AuthError::not_found("Grant", grant_id.to_string()))
    }

    pub async fn grants_for_patient(
        &self,
        tenant_id: &str,
        patient_id: &str,
        active_only: bool,
    ) -> AuthResult<Vec<PatientAccessGrant>> {
        self.list(GrantQuery::new(tenant_id).with_patient(patient_id), active_only)
            .await
    }

    pub async fn grants_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        active_only: bool,
    ) -> AuthResult<Vec<PatientAccessGrant>> {
        self.list(GrantQuery::new(tenant_id).with_user(user_id), active_only)
            .await
    }

    async fn list(
        &self,
        query: GrantQuery,
        active_only: bool,
    ) -> AuthResult<Vec<PatientAccessGrant>> {
        let mut grants = self.grants.list(&query).await?;
        if active_only {
            let now: OffsetDateTime = now_utc();
            grants.retain(|g| g.is_effective(now));
        }
        Ok(grants)
    }
}
