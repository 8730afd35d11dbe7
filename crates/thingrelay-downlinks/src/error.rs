//! Error types for the downlinks crate.

pub use thingrelay_core::error::Error as RelayError;

#[derive(Debug, thiserror::Error)]
pub enum DownlinkError {
    #[error("Invalid downlink: {0}")]
    Invalid(String),

    #[error("Invalid schedule: {0}")]
    Schedule(String),

    #[error("Rate limiter wait would exceed the execution deadline")]
    RateLimited,

    #[error("Downlink execution timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("XML conversion failed: {0}")]
    Xml(String),
}

pub type Result<T> = std::result::Result<T, DownlinkError>;

impl From<DownlinkError> for RelayError {
    fn from(e: DownlinkError) -> Self {
        match e {
            DownlinkError::Invalid(s) | DownlinkError::Schedule(s) => RelayError::Validation(s),
            DownlinkError::Xml(s) => RelayError::Serialization(s),
            other => RelayError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DownlinkError {
    fn from(e: reqwest::Error) -> Self {
        DownlinkError::Http(e.to_string())
    }
}
