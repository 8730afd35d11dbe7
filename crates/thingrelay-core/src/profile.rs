//! Profile configuration returned by the Things service.
//!
//! A profile decides how a thing's messages are routed: content type,
//! whether they are stored, how they are transformed, which notifiers
//! fire, and which rules are evaluated against them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rule::Rule;

/// SenML encoded as JSON.
pub const SENML_CONTENT_TYPE: &str = "application/senml+json";
/// SenML encoded as CBOR.
pub const CBOR_CONTENT_TYPE: &str = "application/senml+cbor";
/// Plain JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Subject format token derived from a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Senml,
    Json,
}

impl ContentFormat {
    /// Resolve the format for a content type. An empty content type is SenML.
    pub fn from_content_type(content_type: &str) -> Result<Self> {
        match content_type {
            "" | SENML_CONTENT_TYPE | CBOR_CONTENT_TYPE => Ok(Self::Senml),
            JSON_CONTENT_TYPE => Ok(Self::Json),
            other => Err(Error::UnknownContent(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Senml => "senml",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format token for a content type.
pub fn content_format(content_type: &str) -> Result<ContentFormat> {
    ContentFormat::from_content_type(content_type)
}

/// How JSON payloads are reshaped before storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformer {
    /// Keys to keep from the payload; empty keeps everything.
    #[serde(default)]
    pub data_filters: Vec<String>,
    /// Dot path to the object that holds the values; empty means the root.
    #[serde(default)]
    pub data_field: String,
    /// Key that holds the measurement time.
    #[serde(default)]
    pub time_field: String,
    /// Named time format (`unix`, `unix_ms`, `rfc3339`, ...) or a strftime layout.
    #[serde(default)]
    pub time_format: String,
    /// IANA time zone for layouts without an offset.
    #[serde(default)]
    pub time_location: String,
}

/// Per-thing profile configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub content_type: String,
    /// Whether messages go to the format-qualified storage subject.
    #[serde(default)]
    pub write: bool,
    /// Whether messages are forwarded to the thing's webhooks.
    #[serde(default)]
    pub webhook: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<Transformer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smpp_id: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl ProfileConfig {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Default::default()
        }
    }

    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn with_webhook(mut self, webhook: bool) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_smtp(mut self, id: impl Into<String>) -> Self {
        self.smtp_id = Some(id.into());
        self
    }

    pub fn with_smpp(mut self, id: impl Into<String>) -> Self {
        self.smpp_id = Some(id.into());
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Subject format token for this profile.
    pub fn format(&self) -> Result<ContentFormat> {
        ContentFormat::from_content_type(&self.content_type)
    }

    /// Reject content types outside the recognised three.
    pub fn validate(&self) -> Result<()> {
        self.format().map(|_| ())
    }
}

/// Result of resolving a thing key against the Things service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PubConfig {
    /// Id of the thing that owns the key.
    pub publisher_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_config: Option<ProfileConfig>,
}

impl PubConfig {
    pub fn new(publisher_id: impl Into<String>, profile_config: Option<ProfileConfig>) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            profile_config,
        }
    }
}
