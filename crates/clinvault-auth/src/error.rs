//! Authorization error types.

use std::fmt;

use clinvault_storage::StorageError;

/// Errors raised by the access policy and grant storage.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A patient or grant does not exist in the principal's tenant.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of thing that was looked up.
        resource: String,
        /// The id that was looked up.
        id: String,
    },

    /// The request is malformed, e.g. an emergency grant without justification.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// No scope of the principal covers the operation.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of the missing scope.
        message: String,
    },

    /// The principal is known but may not touch this patient.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// The resource store failed while resolving a patient.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
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

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// `Unauthorized` or `Forbidden`.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Storage(_) => ErrorCategory::Infrastructure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Validation,
    Authentication,
    Authorization,
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            AuthError::not_found("Patient", "p1").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            AuthError::forbidden("no grant").category(),
            ErrorCategory::Authorization
        );
        assert!(AuthError::unauthorized("x").is_denial());
        assert!(!AuthError::validation("x").is_denial());
    }

    #[test]
    fn test_storage_errors_convert() {
        let err: AuthError = StorageError::internal("disk").into();
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
