//! # clinvault-service
//!
//! Entry point for callers of Clinvault. [`ClinicalRepository`] ties the
//! resource store, search engine, bundle service and access policy together
//! for one [`Principal`](clinvault_auth::Principal):
//!
//! 1. the principal needs a scope covering `{type}.{read|write}`, or patient
//!    scopes for resources inside a patient compartment (`Unauthorized`);
//! 2. resources inside a patient compartment need access through
//!    [`AccessPolicy`](clinvault_auth::AccessPolicy) (`Forbidden`);
//! 3. the store, search or bundle call runs in the principal's tenant;
//! 4. an audit event records the outcome.
//!
//! Search, list and export results are filtered down to what the principal
//! may read instead of failing as a whole.

mod error;
mod repository;

pub use error::ServiceError;
pub use repository::ClinicalRepository;
