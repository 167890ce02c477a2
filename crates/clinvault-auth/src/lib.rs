//! Authorization for Clinvault.
//!
//! - [`Principal`]: tenant, user, role and parsed scopes of a caller.
//! - [`AccessPolicy`]: scope and grant based patient access decisions, plus
//!   grant and revoke operations with lazy expiry.
//! - [`AuditRecorder`]: fire-and-forget audit events.

pub mod audit;
pub mod error;
pub mod grants;
pub mod policy;
pub mod principal;
pub mod scopes;
pub mod storage;

pub use audit::{
    AuditAction, AuditEvent, AuditOutcome, AuditRecorder, AuditSink, AuditSinkError,
    NoopAuditSink, TracingAuditSink,
};
pub use error::{AuthError, ErrorCategory};
pub use grants::{AccessLevel, GrantRequest, PatientAccessGrant, RevokeTarget};
pub use policy::{AccessPolicy, AccessPolicyConfig};
pub use principal::{Principal, Role};
pub use scopes::{Scope, ScopeError};
pub use storage::{DynGrantStorage, GrantQuery, GrantStorage, InMemoryGrantStorage};

/// Result type for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;
