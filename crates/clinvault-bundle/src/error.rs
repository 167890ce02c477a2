use clinvault_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    /// The bundle as a whole is unusable.
    #[error("Invalid bundle: {message}")]
    Validation { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BundleError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<StorageError> for BundleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}
