//! Notification targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use thingrelay_core::Message;

use crate::error::{NotifierError, Result};

/// A named set of contacts in a group. Contacts are email addresses for
/// SMTP notifiers and phone numbers for SMPP notifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    pub name: String,
    pub contacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// HTTP endpoint that receives every message of a thing with webhooks on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub thing_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl Webhook {
    /// Only absolute http(s) URLs are accepted.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| NotifierError::InvalidConfiguration(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifierError::InvalidConfiguration(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// What a notifier sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub content: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
        }
    }

    pub fn from_message(msg: &Message) -> Self {
        let subject = if msg.subtopic.is_empty() {
            format!("Notification from thing {}", msg.publisher)
        } else {
            format!("Notification from thing {} on {}", msg.publisher, msg.subtopic)
        };
        Self::new(subject, String::from_utf8_lossy(&msg.payload))
    }
}
