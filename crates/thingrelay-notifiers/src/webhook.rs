//! Webhook delivery.

use serde_json::Value;
use tracing::debug;

use thingrelay_core::transformers::transform;
use thingrelay_core::Message;

use crate::error::{NotifierError, Result};
use crate::model::Webhook;

#[derive(Debug, Clone, Default)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST `body` to the webhook with its headers.
    pub async fn send(&self, hook: &Webhook, body: &Value) -> Result<()> {
        let mut request = self.client.post(&hook.url);
        for (key, value) in &hook.headers {
            request = request.header(key, value);
        }

        let response = request.json(body).send().await?;
        if !response.status().is_success() {
            return Err(NotifierError::SendFailed(format!(
                "Webhook returned error: {}",
                response.status()
            )));
        }
        debug!(webhook_id = %hook.id, "Webhook delivered");
        Ok(())
    }
}

/// Transformed records of a message, or its raw JSON payload when it cannot
/// be transformed.
pub fn webhook_body(msg: &Message) -> Result<Value> {
    match transform(msg) {
        Ok(records) => serde_json::to_value(records)
            .map_err(|e| NotifierError::SendFailed(e.to_string())),
        Err(e) => serde_json::from_slice(&msg.payload).map_err(|_| {
            NotifierError::SendFailed(format!("payload is not deliverable: {}", e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thingrelay_core::profile::{ProfileConfig, JSON_CONTENT_TYPE};

    #[test]
    fn test_body_uses_transformer() {
        let mut msg = Message::new("http", "", br#"{"t":21}"#.to_vec());
        msg.publisher = "t1".into();
        msg.profile = Some(ProfileConfig::new(JSON_CONTENT_TYPE));
        let body = webhook_body(&msg).unwrap();
        assert!(body.is_array());
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_body_falls_back_to_raw_json() {
        let mut msg = Message::new("http", "", br#"{"t":21}"#.to_vec());
        msg.profile = Some(ProfileConfig::new("text/plain"));
        assert_eq!(webhook_body(&msg).unwrap(), serde_json::json!({"t": 21}));

        msg.payload = b"not json".to_vec();
        assert!(webhook_body(&msg).is_err());
    }
}
