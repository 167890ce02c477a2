use thiserror::Error;

/// Rejected input to the core helpers: ids, date parameters and
/// relative periods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("'{0}' is not a valid resource id")]
    InvalidId(String),

    #[error("Unparsable date parameter {0}")]
    InvalidDateTime(String),

    #[error("Unknown time period '{0}'")]
    InvalidTimePeriod(String),
}

impl CoreError {
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    pub fn invalid_date_time(detail: impl Into<String>) -> Self {
        Self::InvalidDateTime(detail.into())
    }

    pub fn invalid_time_period(period: impl Into<String>) -> Self {
        Self::InvalidTimePeriod(period.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
