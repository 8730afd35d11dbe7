//! Broker-level errors.
//!
//! Broker implementations report [`BrokerError`]; the PubSub adapter turns
//! them into [`thingrelay_core::Error::Broker`] and adds its own timeouts.

use thiserror::Error;

pub use thingrelay_core::error::Error as RelayError;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(String),

    /// The broker was closed.
    #[error("Broker closed")]
    Closed,
}

impl From<BrokerError> for RelayError {
    fn from(e: BrokerError) -> Self {
        RelayError::Broker(e.to_string())
    }
}
