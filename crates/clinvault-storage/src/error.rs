//! Failures of the versioned resource store.

use std::fmt;

use clinvault_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The logical key has no version at all.
    #[error("{resource_type}/{id} has no stored version")]
    NotFound { resource_type: String, id: String },

    /// Another writer inserted `version_id` first. Re-read the current
    /// version and apply the write again.
    #[error("{resource_type}/{id}: version {version_id} was written concurrently")]
    VersionConflict {
        resource_type: String,
        id: String,
        version_id: u64,
    },

    /// Create was called on a key whose current version is live.
    #[error("{resource_type}/{id} is already live")]
    AlreadyExists { resource_type: String, id: String },

    #[error("Malformed document: {message}")]
    InvalidResource { message: String },

    /// Cancelled before the insert; nothing was written.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backend failure: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn version_conflict(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: u64,
    ) -> Self {
        Self::VersionConflict {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id,
        }
    }

    #[must_use]
    pub fn already_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Version races and create-over-live both count.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::AlreadyExists { .. }
        )
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_invalid_resource(&self) -> bool {
        matches!(self, Self::InvalidResource { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Coarse classification, used as a structured log field.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::VersionConflict { .. } | Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        Self::invalid_resource(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
