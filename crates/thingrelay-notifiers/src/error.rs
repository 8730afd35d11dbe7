//! Error types for the notifiers crate.

pub use thingrelay_core::error::Error as RelayError;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("SMPP error: {0}")]
    Smpp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NotifierError>;

impl From<NotifierError> for RelayError {
    fn from(e: NotifierError) -> Self {
        match e {
            NotifierError::InvalidContact(s) | NotifierError::InvalidConfiguration(s) => {
                RelayError::Validation(s)
            }
            other => RelayError::Internal(other.to_string()),
        }
    }
}

#[cfg(feature = "webhook")]
impl From<reqwest::Error> for NotifierError {
    fn from(e: reqwest::Error) -> Self {
        NotifierError::SendFailed(e.to_string())
    }
}
