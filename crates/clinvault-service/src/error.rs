//! Errors surfaced to callers of [`ClinicalRepository`](crate::ClinicalRepository).

use clinvault_auth::AuthError;
use clinvault_bundle::BundleError;
use clinvault_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No scope of the principal covers the resource type and action.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The principal may not touch the patient the resource belongs to.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Bundle(BundleError),
}

impl ServiceError {
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::Storage(e) => e.is_invalid_resource(),
            Self::Bundle(e) => e.is_validation(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_conflict())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable code, used as the audit failure code.
    pub fn code(&self) -> &'static str {
        if self.is_not_found() {
            return "not-found";
        }
        if self.is_validation() {
            return "invalid";
        }
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::Cancelled => "cancelled",
            Self::Storage(e) if e.is_conflict() => "conflict",
            _ => "exception",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotFound { resource, id } => Self::NotFound { resource, id },
            AuthError::Validation { message } => Self::Validation { message },
            AuthError::Unauthorized { message } => Self::Unauthorized { message },
            AuthError::Forbidden { message } => Self::Forbidden { message },
            AuthError::Storage(e) => e.into(),
        }
    }
}

impl From<BundleError> for ServiceError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Cancelled => Self::Cancelled,
            BundleError::Storage(e) => e.into(),
            other => Self::Bundle(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_flatten() {
        let err = ServiceError::from(AuthError::forbidden("no grant"));
        assert!(err.is_forbidden());
        assert_eq!(err.code(), "forbidden");

        let err = ServiceError::from(AuthError::not_found("Patient", "p9"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Patient not found: p9");

        let err = ServiceError::from(AuthError::Storage(StorageError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_storage_and_bundle_codes() {
        let err = ServiceError::from(StorageError::already_exists("Patient", "p1"));
        assert!(err.is_conflict());
        assert_eq!(err.code(), "conflict");

        let err = ServiceError::from(BundleError::validation("bundle has no entry array"));
        assert!(err.is_validation());
        assert_eq!(err.code(), "invalid");

        assert!(ServiceError::from(BundleError::Cancelled).is_cancelled());
        assert_eq!(
            ServiceError::from(StorageError::not_found("Patient", "p1")).code(),
            "not-found"
        );
    }
}
