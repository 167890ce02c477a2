//! The authenticated caller, as handed over by the token layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::grants::AccessLevel;
use crate::scopes::{Scope, WILDCARD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    HealthcareProvider,
    Patient,
    Auditor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemAdmin => "system_admin",
            Self::HealthcareProvider => "healthcare_provider",
            Self::Patient => "patient",
            Self::Auditor => "auditor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system_admin" => Ok(Self::SystemAdmin),
            "healthcare_provider" => Ok(Self::HealthcareProvider),
            "patient" => Ok(Self::Patient),
            "auditor" => Ok(Self::Auditor),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Tenant context of a request.
///
/// Scope strings that do not parse are dropped with a warning when the
/// principal is built, so every later check works on parsed scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub tenant_id: String,
    pub user_id: String,
    pub role: Role,
    pub scopes: Vec<Scope>,
}

impl Principal {
    pub fn new<I, S>(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        scopes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = scopes
            .into_iter()
            .filter_map(|raw| match Scope::parse(raw.as_ref()) {
                Ok(scope) => Some(scope),
                Err(e) => {
                    tracing::warn!(scope = raw.as_ref(), error = %e, "dropping malformed scope");
                    None
                }
            })
            .collect();
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            role,
            scopes,
        }
    }

    /// True when any granted scope covers `required`.
    pub fn has_scope(&self, required: &Scope) -> bool {
        self.scopes.iter().any(|s| s.covers(required))
    }

    /// True when a `system/*` scope grants `level` on every patient without
    /// consulting grants. Read and Write need the matching action; Admin and
    /// Emergency need `system/*.*`.
    pub fn has_system_access(&self, level: AccessLevel) -> bool {
        let action = match level {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin | AccessLevel::Emergency => WILDCARD,
        };
        self.scopes
            .iter()
            .any(|s| s.is_system_wide() && s.grants_action(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_scopes_are_dropped() {
        let principal = Principal::new(
            "t1",
            "u1",
            Role::HealthcareProvider,
            ["user/*.read", "openid", "patient/p1.*"],
        );
        assert_eq!(principal.scopes.len(), 2);
        assert!(principal.has_scope(&Scope::new("*", "Observation", "read")));
        assert!(!principal.has_scope(&Scope::new("*", "Observation", "write")));
        assert!(!principal.has_system_access(AccessLevel::Read));
    }

    #[test]
    fn test_system_access_by_level() {
        let reader = Principal::new("t1", "svc", Role::SystemAdmin, ["system/*.read"]);
        assert!(reader.has_system_access(AccessLevel::Read));
        assert!(!reader.has_system_access(AccessLevel::Write));
        assert!(!reader.has_system_access(AccessLevel::Admin));

        let full = Principal::new("t1", "svc", Role::SystemAdmin, ["system/*.*"]);
        assert!(full.has_system_access(AccessLevel::Admin));
        assert!(full.has_system_access(AccessLevel::Emergency));

        let narrow = Principal::new("t1", "svc", Role::SystemAdmin, ["system/Observation.*"]);
        assert!(!narrow.has_system_access(AccessLevel::Read));
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            Role::SystemAdmin,
            Role::HealthcareProvider,
            Role::Patient,
            Role::Auditor,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("janitor".parse::<Role>().is_err());
    }
}
