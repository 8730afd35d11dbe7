//! Steps shared by every adapter: key resolution, envelope building and
//! status-code mapping at the transport boundary.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use thingrelay_core::subjects::create_subject;
use thingrelay_core::{format_message, Error, Message, PubConfig, Result, ThingKey, ThingsClient};
use thingrelay_core::things::KeyType;
use thingrelay_messaging::Publisher;

/// Header carrying the key type when the external key is presented.
pub const KEY_TYPE_HEADER: &str = "x-key-type";
/// Optional prefix in the `Authorization` header.
pub const THING_PREFIX: &str = "Thing ";

/// Resolve a thing key. Any lookup failure becomes [`Error::Authorization`].
pub async fn resolve(things: &dyn ThingsClient, key: &ThingKey) -> Result<PubConfig> {
    if key.value.is_empty() {
        return Err(Error::Authentication("missing thing key".to_string()));
    }
    things
        .get_pub_config_by_key(key)
        .await
        .map_err(Error::authorization)
}

/// Authenticate, format and publish one inbound payload.
///
/// The subtopic is validated before the Things service is called.
pub async fn publish<P: Publisher + ?Sized>(
    things: &dyn ThingsClient,
    publisher: &P,
    key: &ThingKey,
    protocol: &str,
    subtopic: &str,
    payload: Vec<u8>,
) -> Result<Message> {
    let subtopic = create_subject(subtopic)?;
    let pub_config = resolve(things, key).await?;

    let mut msg = Message::new(protocol, subtopic, payload);
    format_message(&pub_config, &mut msg);
    publisher.publish(&msg).await?;
    Ok(msg)
}

/// Read the thing key from `Authorization` (optionally `Thing `-prefixed)
/// and `X-Key-Type`.
pub fn key_from_headers(headers: &HeaderMap) -> Result<ThingKey> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix(THING_PREFIX).unwrap_or(v).trim())
        .unwrap_or_default();
    let key_type = headers
        .get(KEY_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    key_from_parts(value, key_type)
}

pub fn key_from_parts(value: &str, key_type: &str) -> Result<ThingKey> {
    let key_type = KeyType::parse(key_type)
        .ok_or_else(|| Error::Authentication(format!("unknown key type {:?}", key_type)))?;
    if value.is_empty() {
        return Err(Error::Authentication("missing thing key".to_string()));
    }
    Ok(ThingKey {
        key_type,
        value: value.to_string(),
    })
}

/// JSON error body returned by the HTTP and WebSocket routers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Map an error onto its HTTP status with a JSON body.
pub fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.status().http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use thingrelay_core::{InMemoryThings, ProfileConfig};

    #[test]
    fn test_key_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Thing k1"));
        assert_eq!(key_from_headers(&headers).unwrap(), ThingKey::internal("k1"));

        headers.insert(KEY_TYPE_HEADER, HeaderValue::from_static("external"));
        assert_eq!(key_from_headers(&headers).unwrap(), ThingKey::external("k1"));

        headers.insert(KEY_TYPE_HEADER, HeaderValue::from_static("bogus"));
        assert!(matches!(
            key_from_headers(&headers),
            Err(Error::Authentication(_))
        ));

        assert!(matches!(
            key_from_headers(&HeaderMap::new()),
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_wraps_lookup_failures() {
        let things = InMemoryThings::new().with_thing("t1", "g1", "k1", ProfileConfig::default());

        let cfg = resolve(&things, &ThingKey::internal("k1")).await.unwrap();
        assert_eq!(cfg.publisher_id, "t1");

        let err = resolve(&things, &ThingKey::internal("nope")).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
        assert_eq!(err.status().http_status(), 403);
    }
}
