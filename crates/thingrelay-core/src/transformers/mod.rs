//! Message transformers.
//!
//! A transformer turns a formatted [`Message`] into storable records:
//!
//! ```text
//! Message ──▶ SenmlTransformer ──▶ Vec<SenmlRecord>   (resolved base fields)
//!         └─▶ JsonTransformer  ──▶ Vec<JsonRecord>    (filtered, timestamped)
//! ```
//!
//! [`transform`] picks the transformer from the message's content type.

pub mod json;
pub mod senml;

use serde::Serialize;

use crate::error::Result;
use crate::message::Message;
use crate::profile::ContentFormat;

pub use json::{JsonRecord, JsonTransformer};
pub use senml::{SenmlRecord, SenmlTransformer};

/// Output of a transformer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Records {
    Senml(Vec<SenmlRecord>),
    Json(Vec<JsonRecord>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Self::Senml(r) => r.len(),
            Self::Json(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait MessageTransformer: Send + Sync {
    fn transform(&self, msg: &Message) -> Result<Records>;
}

/// Transform a message according to its content type.
pub fn transform(msg: &Message) -> Result<Records> {
    let format = match &msg.profile {
        Some(profile) => profile.format()?,
        None => ContentFormat::Senml,
    };
    match format {
        ContentFormat::Senml => SenmlTransformer.transform(msg),
        ContentFormat::Json => JsonTransformer.transform(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::profile::{ProfileConfig, JSON_CONTENT_TYPE};

    #[test]
    fn test_transform_dispatches_on_content_type() {
        let mut msg = Message::new("http", "", br#"{"t":1}"#.to_vec());
        msg.profile = Some(ProfileConfig::new(JSON_CONTENT_TYPE));
        assert!(matches!(transform(&msg).unwrap(), Records::Json(_)));

        let mut msg = Message::new("http", "", br#"[{"n":"t","v":1}]"#.to_vec());
        msg.profile = None;
        assert!(matches!(transform(&msg).unwrap(), Records::Senml(_)));

        msg.profile = Some(ProfileConfig::new("text/plain"));
        assert!(matches!(transform(&msg), Err(Error::UnknownContent(_))));
    }
}
