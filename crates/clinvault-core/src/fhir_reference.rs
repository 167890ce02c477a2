//! Reference parsing and subject resolution.
//!
//! Clinical documents point at their subject through reference fields such
//! as `subject.reference = "Patient/123"`. Search groups observations by the
//! referenced id and access control resolves the patient a document belongs
//! to, so both need the same parsing rules.
//!
//! # Example
//!
//! ```
//! use clinvault_core::fhir_reference::{parse_reference, subject_id};
//! use serde_json::json;
//!
//! let r = parse_reference("Patient/123/_history/2").unwrap();
//! assert_eq!(r.resource_type, "Patient");
//! assert_eq!(r.id, "123");
//! assert_eq!(r.version, Some("2".to_string()));
//!
//! let obs = json!({"resourceType": "Observation", "subject": {"reference": "Patient/p1"}});
//! assert_eq!(subject_id(&obs), Some("p1".to_string()));
//! ```

use std::fmt;

use serde_json::Value;

/// Reference fields consulted, in order, when resolving a document's subject.
pub const SUBJECT_FIELDS: &[&str] = &["subject", "patient", "beneficiary"];

/// A successfully parsed relative reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    pub resource_type: String,
    pub id: String,
    /// Version from a `_history` suffix.
    pub version: Option<String>,
}

impl FhirReference {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_relative())
    }
}

/// Represents a reference that cannot be resolved locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvableReference {
    /// A contained reference (starts with `#`)
    Contained(String),
    /// A URN reference (`urn:uuid:xxx` or `urn:oid:xxx`)
    Urn(String),
    /// A malformed or invalid reference
    Invalid(String),
}

impl fmt::Display for UnresolvableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contained(id) => write!(f, "contained reference: #{id}"),
            Self::Urn(urn) => write!(f, "URN reference: {urn}"),
            Self::Invalid(reason) => write!(f, "invalid reference: {reason}"),
        }
    }
}

impl std::error::Error for UnresolvableReference {}

/// Parses `Type/id`, `Type/id/_history/version`, or an absolute URL whose
/// path ends with one of those forms.
pub fn parse_reference(reference: &str) -> Result<FhirReference, UnresolvableReference> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UnresolvableReference::Invalid("empty reference".to_string()));
    }
    if let Some(contained_id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(contained_id.to_string()));
    }
    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    let parts: Vec<&str> = reference.split('/').filter(|p| !p.is_empty()).collect();

    // Walk from the end so absolute URLs resolve to their trailing Type/id.
    let (type_idx, version) = match parts.len() {
        n if n >= 4 && parts[n - 2] == "_history" => (n - 4, Some(parts[n - 1].to_string())),
        n if n >= 2 => (n - 2, None),
        _ => {
            return Err(UnresolvableReference::Invalid(format!(
                "reference must contain at least Type/id: {reference}"
            )));
        }
    };

    let resource_type = parts[type_idx];
    let id = parts[type_idx + 1];

    if !resource_type
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
    {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must start with uppercase letter: {resource_type}"
        )));
    }

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}

/// Returns the raw subject reference string of a document, if any.
pub fn subject_reference(document: &Value) -> Option<&str> {
    SUBJECT_FIELDS.iter().find_map(|field| {
        document
            .get(field)
            .and_then(|r| r.get("reference"))
            .and_then(Value::as_str)
    })
}

/// Extracts the id of the document's subject.
///
/// Parsable references yield their id; anything else yields the raw
/// reference string so that documents pointing at the same opaque subject
/// still group together.
pub fn subject_id(document: &Value) -> Option<String> {
    let raw = subject_reference(document)?;
    match parse_reference(raw) {
        Ok(parsed) => Some(parsed.id),
        Err(_) => Some(raw.to_string()),
    }
}

/// Resolves the patient a document belongs to.
///
/// A `Patient` document is its own compartment; other documents belong to
/// the patient their subject reference points at.
pub fn patient_compartment(resource_type: &str, id: &str, document: &Value) -> Option<String> {
    if resource_type == "Patient" {
        return Some(id.to_string());
    }
    let parsed = parse_reference(subject_reference(document)?).ok()?;
    (parsed.resource_type == "Patient").then_some(parsed.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_relative_reference() {
        let r = parse_reference("Patient/123").unwrap();
        assert_eq!(r.resource_type, "Patient");
        assert_eq!(r.id, "123");
        assert_eq!(r.version, None);
        assert_eq!(r.to_string(), "Patient/123");
    }

    #[test]
    fn test_absolute_url_reference() {
        let r = parse_reference("https://ehr.example.org/fhir/Patient/77/_history/3").unwrap();
        assert_eq!(r.resource_type, "Patient");
        assert_eq!(r.id, "77");
        assert_eq!(r.version, Some("3".to_string()));
    }

    #[test]
    fn test_unresolvable_references() {
        assert!(matches!(
            parse_reference("#c1"),
            Err(UnresolvableReference::Contained(_))
        ));
        assert!(matches!(
            parse_reference("urn:uuid:abc"),
            Err(UnresolvableReference::Urn(_))
        ));
        assert!(matches!(
            parse_reference("Patient"),
            Err(UnresolvableReference::Invalid(_))
        ));
        assert!(matches!(
            parse_reference("patient/1"),
            Err(UnresolvableReference::Invalid(_))
        ));
        assert!(parse_reference("  ").is_err());
    }

    #[test]
    fn test_subject_id_falls_back_to_raw_reference() {
        let doc = json!({"subject": {"reference": "urn:uuid:42"}});
        assert_eq!(subject_id(&doc), Some("urn:uuid:42".to_string()));

        let doc = json!({"patient": {"reference": "Patient/p9"}});
        assert_eq!(subject_id(&doc), Some("p9".to_string()));

        assert_eq!(subject_id(&json!({"status": "final"})), None);
    }

    #[test]
    fn test_patient_compartment() {
        let obs = json!({"subject": {"reference": "Patient/p1"}});
        assert_eq!(
            patient_compartment("Observation", "o1", &obs),
            Some("p1".to_string())
        );
        assert_eq!(
            patient_compartment("Patient", "p2", &json!({})),
            Some("p2".to_string())
        );

        let group_subject = json!({"subject": {"reference": "Group/g1"}});
        assert_eq!(patient_compartment("Observation", "o2", &group_subject), None);
        assert_eq!(patient_compartment("Organization", "org", &json!({})), None);
    }
}
