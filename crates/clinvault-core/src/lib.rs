pub mod error;
pub mod fhir_reference;
pub mod id;
pub mod search_index;
pub mod time;

pub use error::{CoreError, Result};
pub use fhir_reference::{
    FhirReference, UnresolvableReference, parse_reference, patient_compartment, subject_id,
    subject_reference,
};
pub use id::{generate_id, validate_id};
pub use search_index::{SearchIndex, extract_search_index, extract_security_labels, extract_tags};
pub use time::{TimePeriod, TimeWindow, format_rfc3339, now_utc, parse_date_param};
