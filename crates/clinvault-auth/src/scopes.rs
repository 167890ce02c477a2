//! Scope strings of the form `namespace/resource.action`.
//!
//! Matching is segment-wise: a `*` in either the granted or the required
//! scope satisfies that segment. A missing action is treated as `*`, so
//! `patient/*` and `patient/*.*` are equivalent.

use std::fmt;
use std::str::FromStr;

/// Wildcard segment.
pub const WILDCARD: &str = "*";

/// Namespace whose scopes bypass patient-level checks.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Namespace whose resource segment names a patient id.
pub const PATIENT_NAMESPACE: &str = "patient";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("Empty scope string")]
    Empty,

    #[error("Invalid scope format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub namespace: String,
    pub resource: String,
    pub action: String,
}

impl Scope {
    pub fn new(
        namespace: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parses `namespace/resource[.action]`.
    pub fn parse(s: &str) -> Result<Self, ScopeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScopeError::Empty);
        }
        let (namespace, rest) = s
            .split_once('/')
            .ok_or_else(|| ScopeError::InvalidFormat(s.to_string()))?;
        // Patient ids may contain dots, so the action is the last segment.
        let (resource, action) = rest.rsplit_once('.').unwrap_or((rest, WILDCARD));
        if namespace.is_empty() || resource.is_empty() || action.is_empty() {
            return Err(ScopeError::InvalidFormat(s.to_string()));
        }
        Ok(Self::new(namespace, resource, action))
    }

    /// True when this (granted) scope satisfies `required`.
    pub fn covers(&self, required: &Scope) -> bool {
        segment_matches(&self.namespace, &required.namespace)
            && segment_matches(&self.resource, &required.resource)
            && segment_matches(&self.action, &required.action)
    }

    pub fn is_system(&self) -> bool {
        self.namespace == SYSTEM_NAMESPACE
    }

    /// `system/*.{action}`: every resource of the tenant, not just one type.
    pub fn is_system_wide(&self) -> bool {
        self.is_system() && self.resource == WILDCARD
    }

    /// The action segment is `*` or exactly `action`. Unlike [`covers`](Self::covers),
    /// a wildcard in `action` does not match a narrower granted action.
    pub fn grants_action(&self, action: &str) -> bool {
        self.action == WILDCARD || self.action == action
    }

    /// `patient/*`: any patient the principal holds a grant for.
    pub fn is_patient_wildcard(&self) -> bool {
        self.namespace == PATIENT_NAMESPACE && self.resource == WILDCARD
    }

    /// `patient/{id}.*` for exactly this patient.
    pub fn names_patient(&self, patient_id: &str) -> bool {
        self.namespace == PATIENT_NAMESPACE && self.resource == patient_id
    }
}

fn segment_matches(granted: &str, required: &str) -> bool {
    granted == WILDCARD || required == WILDCARD || granted == required
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.namespace, self.resource, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let scope = Scope::parse("user/Observation.read").unwrap();
        assert_eq!(scope, Scope::new("user", "Observation", "read"));

        let wildcard = Scope::parse("patient/*").unwrap();
        assert_eq!(wildcard.action, "*");
        assert!(wildcard.is_patient_wildcard());

        let dotted = Scope::parse("patient/pat.1.*").unwrap();
        assert_eq!(dotted.resource, "pat.1");
        assert!(dotted.names_patient("pat.1"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Scope::parse("  "), Err(ScopeError::Empty));
        assert!(matches!(
            Scope::parse("openid"),
            Err(ScopeError::InvalidFormat(_))
        ));
        assert!(Scope::parse("/Patient.read").is_err());
        assert!(Scope::parse("user/.read").is_err());
    }

    #[test]
    fn test_system_wide_needs_wildcard_resource() {
        assert!(Scope::parse("system/*.read").unwrap().is_system_wide());
        assert!(Scope::parse("system/*").unwrap().is_system_wide());

        let narrow = Scope::parse("system/Observation.read").unwrap();
        assert!(narrow.is_system());
        assert!(!narrow.is_system_wide());

        assert!(narrow.grants_action("read"));
        assert!(!narrow.grants_action("*"));
        assert!(Scope::parse("system/*.*").unwrap().grants_action("write"));
    }

    #[test]
    fn test_segment_wise_matching() {
        let granted = Scope::parse("user/*.read").unwrap();
        assert!(granted.covers(&Scope::new("user", "Patient", "read")));
        assert!(!granted.covers(&Scope::new("user", "Patient", "write")));
        assert!(!granted.covers(&Scope::new("system", "Patient", "read")));

        // Wildcards in the required scope match too.
        let exact = Scope::parse("user/Patient.write").unwrap();
        assert!(exact.covers(&Scope::new("*", "Patient", "write")));

        assert!(Scope::parse("system/*").unwrap().covers(&Scope::new("system", "Anything", "write")));
    }

    #[test]
    fn test_display_round_trip() {
        let scope = Scope::parse("patient/*").unwrap();
        assert_eq!(scope.to_string(), "patient/*.*");
        assert_eq!(scope.to_string().parse::<Scope>().unwrap(), scope);
    }
}
