//! Canonical message envelope and its formatter.
//!
//! Every protocol adapter turns an inbound request into a [`Message`], then
//! calls [`format_message`] with the Things lookup result before publishing.
//! After formatting the envelope is only read, except for `subject`, which the
//! publisher rewrites on each fan-out copy.

use serde::{Deserialize, Serialize};

use crate::profile::{ContentFormat, ProfileConfig, PubConfig};
use crate::rule::Rule;

/// Protocol tag for CoAP-originated messages.
pub const PROTOCOL_COAP: &str = "coap";
/// Protocol tag for MQTT-originated messages.
pub const PROTOCOL_MQTT: &str = "mqtt";
/// Protocol tag for HTTP-originated messages.
pub const PROTOCOL_HTTP: &str = "http";
/// Protocol tag for WebSocket-originated messages.
pub const PROTOCOL_WEBSOCKET: &str = "websocket";
/// Protocol tag for responses fetched by the downlink scheduler.
pub const PROTOCOL_HTTP_DOWNLINK: &str = "http-downlink";

/// Canonical message envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker subject this copy was published on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    /// Id of the originating thing.
    #[serde(default)]
    pub publisher: String,
    /// Normalised dot-separated subtopic; empty is the root.
    #[serde(default)]
    pub subtopic: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Unix time in nanoseconds, set by the formatter.
    #[serde(default)]
    pub created: i64,
    /// Enrichment copied from the sender's profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileConfig>,
    /// Rule id on alarm deliveries, notifier id on smtp and smpp deliveries.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

impl Message {
    pub fn new(protocol: impl Into<String>, subtopic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            protocol: protocol.into(),
            subtopic: subtopic.into(),
            payload,
            ..Default::default()
        }
    }

    /// Content type from the profile, empty when unformatted.
    pub fn content_type(&self) -> &str {
        self.profile
            .as_ref()
            .map(|p| p.content_type.as_str())
            .unwrap_or("")
    }

    /// Subject format token; unknown content types fall back to `None`.
    pub fn format(&self) -> Option<ContentFormat> {
        ContentFormat::from_content_type(self.content_type()).ok()
    }

    pub fn write_enabled(&self) -> bool {
        self.profile.as_ref().map(|p| p.write).unwrap_or(false)
    }

    /// Rules attached by the profile.
    pub fn rules(&self) -> &[Rule] {
        self.profile
            .as_ref()
            .map(|p| p.rules.as_slice())
            .unwrap_or(&[])
    }

    /// Copy of this envelope addressed to `subject`.
    pub fn with_subject(&self, subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..self.clone()
        }
    }

    /// Copy of this envelope addressed to one rule or notifier.
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    /// Copy of this envelope carrying a different payload.
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}

/// Fill publisher, creation time and profile enrichment from a Things lookup.
///
/// A missing profile leaves the envelope's enrichment untouched.
pub fn format_message(pub_config: &PubConfig, msg: &mut Message) {
    msg.publisher = pub_config.publisher_id.clone();
    msg.created = now_nanos();

    if let Some(profile) = &pub_config.profile_config {
        add_profile_to_message(profile, msg);
    }
}

/// Copy a profile verbatim onto the envelope.
pub fn add_profile_to_message(profile: &ProfileConfig, msg: &mut Message) {
    msg.profile = Some(profile.clone());
}

/// Current unix time in nanoseconds.
pub fn now_nanos() -> i64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

mod payload_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
