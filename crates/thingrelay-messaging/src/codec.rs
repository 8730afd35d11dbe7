//! Wire format of envelopes on the broker: JSON with a base64 payload.

use bytes::Bytes;
use thingrelay_core::{Message, Result};

pub fn encode(msg: &Message) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

pub fn decode(bytes: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(bytes)?)
}
