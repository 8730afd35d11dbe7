//! Core types for ThingRelay.
//!
//! This crate holds the canonical message envelope, the profile data that
//! enriches it, subject derivation, the Things service contract, payload
//! transformers and the shared error taxonomy.

pub mod config;
pub mod error;
pub mod message;
pub mod profile;
pub mod rule;
pub mod subjects;
pub mod things;
pub mod timefmt;
pub mod transformers;

pub use error::{Error, Result, StatusClass};
pub use message::{add_profile_to_message, format_message, now_nanos, Message};
pub use profile::{content_format, ContentFormat, ProfileConfig, PubConfig, Transformer};
pub use rule::{Action, Comparator, Condition, Operator, Rule};
pub use things::{InMemoryThings, KeyType, SharedThings, ThingKey, ThingsClient};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{env_vars, BrokerKind, RelayConfig};
    pub use crate::error::{Error, Result, StatusClass};
    pub use crate::message::{
        add_profile_to_message, format_message, Message, PROTOCOL_COAP, PROTOCOL_HTTP,
        PROTOCOL_HTTP_DOWNLINK, PROTOCOL_MQTT, PROTOCOL_WEBSOCKET,
    };
    pub use crate::profile::{ContentFormat, ProfileConfig, PubConfig};
    pub use crate::rule::{Action, Condition, Operator, Rule};
    pub use crate::subjects::{create_subject, get_subjects};
    pub use crate::things::{SharedThings, ThingKey, ThingsClient};
}
