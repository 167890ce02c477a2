//! Patient access grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// Access Level
// ============================================================================

/// Read < Write < Admin. `Emergency` sits outside that order and satisfies
/// every requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
    Emergency,
}

impl AccessLevel {
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Read => Some(1),
            Self::Write => Some(2),
            Self::Admin => Some(3),
            Self::Emergency => None,
        }
    }

    /// True when a grant at this level allows an operation needing `required`.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        match (self.rank(), required.rank()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(have), Some(need)) => have >= need,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

// ============================================================================
// Grant
// ============================================================================

/// Authorization edge between a user and a patient inside one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientAccessGrant {
    pub id: Uuid,
    pub tenant_id: String,
    pub patient_id: String,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub granted_by: String,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub granted_at: OffsetDateTime,
    /// `None` means the grant never expires.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub is_emergency_access: bool,
    pub emergency_justification: Option<String>,
    /// Soft-revoke flag. Expiry does not touch it.
    pub is_active: bool,
    pub revoked_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    pub revocation_reason: Option<String>,
}

impl PatientAccessGrant {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Active and not yet expired.
    pub fn is_effective(&self, now: OffsetDateTime) -> bool {
        self.is_active && !self.is_expired(now)
    }

    /// Emergency grants satisfy every level.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        self.is_emergency_access || self.access_level.satisfies(required)
    }

    /// Tuple under which at most one active grant may exist.
    pub fn same_tuple(&self, other: &PatientAccessGrant) -> bool {
        self.tenant_id == other.tenant_id
            && self.patient_id == other.patient_id
            && self.user_id == other.user_id
            && self.access_level == other.access_level
    }

    pub(crate) fn revoke(&mut self, revoked_by: &str, reason: Option<&str>, now: OffsetDateTime) {
        self.is_active = false;
        self.revoked_by = Some(revoked_by.to_string());
        self.revoked_at = Some(now);
        self.revocation_reason = reason.map(str::to_string);
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub patient_id: String,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub reason: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub is_emergency: bool,
    pub emergency_justification: Option<String>,
}

impl GrantRequest {
    pub fn new(
        patient_id: impl Into<String>,
        user_id: impl Into<String>,
        access_level: AccessLevel,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            user_id: user_id.into(),
            access_level,
            reason: None,
            expires_at: None,
            is_emergency: access_level == AccessLevel::Emergency,
            emergency_justification: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Marks the request as emergency access with its justification.
    #[must_use]
    pub fn emergency(mut self, justification: impl Into<String>) -> Self {
        self.is_emergency = true;
        self.emergency_justification = Some(justification.into());
        self
    }
}

/// What a revoke call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeTarget {
    Grant(Uuid),
    /// Every active grant of the pair, whatever its level.
    PatientUser { patient_id: String, user_id: String },
}

impl RevokeTarget {
    pub fn pair(patient_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::PatientUser {
            patient_id: patient_id.into(),
            user_id: user_id.into(),
        }
    }
}
