//! Error taxonomy shared by every thingrelay crate.
//!
//! The PubSub adapter and the rule evaluator return these variants directly so
//! callers can match on them. Protocol adapters collapse lower-level failures
//! into [`Error::Authorization`] before handing them to a transport.

use thiserror::Error;

/// Result type for thingrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the ingestion pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The thing key or user token could not be identified.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The key or token was rejected, or the Things lookup failed.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Subtopic could not be unescaped or holds an embedded wildcard.
    #[error("Malformed subtopic")]
    MalformedSubtopic,

    /// Subscriber id is empty.
    #[error("Empty subscriber id")]
    EmptyId,

    /// Subscription topic is empty.
    #[error("Empty subscription topic")]
    EmptyTopic,

    /// No registration exists for the (topic, id) pair.
    #[error("Not subscribed")]
    NotSubscribed,

    /// Broker did not acknowledge a subscription in time.
    #[error("Subscribe timeout")]
    SubscribeTimeout,

    /// Broker did not acknowledge an unsubscription in time.
    #[error("Unsubscribe timeout")]
    UnsubscribeTimeout,

    /// Broker did not accept a publish in time.
    #[error("Publish timeout")]
    PublishTimeout,

    /// A handler asked for its subscription to be dropped.
    #[error("Subscription cancelled by handler")]
    SubscriptionCancelled,

    /// Rule action requires a target id but none was configured.
    #[error("Invalid action id")]
    InvalidActionId,

    /// Rule action type is not one of the known types.
    #[error("Invalid action type: {0}")]
    InvalidActionType(String),

    /// Payload field cannot be compared against a numeric threshold.
    #[error("Invalid value type for field {0}")]
    InvalidValueType(String),

    /// Content type is outside SenML-JSON, SenML-CBOR and JSON.
    #[error("Unknown content type: {0}")]
    UnknownContent(String),

    /// Entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broker connection or protocol failure.
    #[error("Broker error: {0}")]
    Broker(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-neutral failure class.
///
/// Transports map these to CoAP response codes or HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl StatusClass {
    /// HTTP status code for this class.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    /// CoAP response code (class.detail) for this class.
    pub fn coap_code(&self) -> (u8, u8) {
        match self {
            Self::BadRequest => (4, 0),
            Self::Unauthorized => (4, 1),
            Self::Forbidden => (4, 3),
            Self::NotFound => (4, 4),
            Self::Internal => (5, 0),
        }
    }
}

impl Error {
    /// Failure class used for status-code mapping at the transport boundary.
    pub fn status(&self) -> StatusClass {
        match self {
            Error::MalformedSubtopic
            | Error::EmptyId
            | Error::EmptyTopic
            | Error::UnknownContent(_)
            | Error::Validation(_)
            | Error::InvalidActionId
            | Error::InvalidActionType(_)
            | Error::InvalidValueType(_) => StatusClass::BadRequest,
            Error::Authentication(_) => StatusClass::Unauthorized,
            Error::Authorization(_) => StatusClass::Forbidden,
            Error::NotFound(_) | Error::NotSubscribed => StatusClass::NotFound,
            _ => StatusClass::Internal,
        }
    }

    /// Wrap any lower-level failure as an authorization failure.
    pub fn authorization(cause: impl std::fmt::Display) -> Self {
        Error::Authorization(cause.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::MalformedSubtopic.status(), StatusClass::BadRequest);
        assert_eq!(
            Error::Authorization("denied".into()).status(),
            StatusClass::Forbidden
        );
        assert_eq!(
            Error::Authentication("bad key".into()).status(),
            StatusClass::Unauthorized
        );
        assert_eq!(Error::SubscribeTimeout.status(), StatusClass::Internal);
        assert_eq!(StatusClass::Forbidden.http_status(), 403);
        assert_eq!(StatusClass::BadRequest.coap_code(), (4, 0));
    }

    #[test]
    fn test_authorization_wraps_cause() {
        let err = Error::authorization(Error::Broker("connection reset".into()));
        assert!(matches!(err, Error::Authorization(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
