//! HTTP ingress.
//!
//! `POST /messages[/<subtopic>]` publishes the request body as the thing
//! identified by the `Authorization` header. The raw request path is used so
//! the subtopic is URL-decoded exactly once.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::debug;

use thingrelay_core::message::PROTOCOL_HTTP;
use thingrelay_core::{Message, Result, SharedThings, ThingKey};
use thingrelay_messaging::Publisher;

use crate::ingress::{self, error_response, key_from_headers};

const MESSAGES_PATH: &str = "/messages";

pub struct HttpService {
    things: SharedThings,
    publisher: Arc<dyn Publisher>,
}

impl HttpService {
    pub fn new(things: SharedThings, publisher: Arc<dyn Publisher>) -> Self {
        Self { things, publisher }
    }

    pub async fn publish(&self, key: &ThingKey, subtopic: &str, payload: Vec<u8>) -> Result<Message> {
        ingress::publish(
            self.things.as_ref(),
            self.publisher.as_ref(),
            key,
            PROTOCOL_HTTP,
            subtopic,
            payload,
        )
        .await
    }
}

pub fn router(service: Arc<HttpService>) -> Router {
    Router::new()
        .route(MESSAGES_PATH, post(publish_handler))
        .route("/messages/*subtopic", post(publish_handler))
        .with_state(service)
}

async fn publish_handler(
    State(service): State<Arc<HttpService>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let subtopic = uri
        .path()
        .strip_prefix(MESSAGES_PATH)
        .unwrap_or_default();

    let key = match key_from_headers(&headers) {
        Ok(key) => key,
        Err(e) => return error_response(&e),
    };

    match service.publish(&key, subtopic, body.to_vec()).await {
        Ok(msg) => {
            debug!(publisher = %msg.publisher, subtopic = %msg.subtopic, "HTTP message published");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => error_response(&e),
    }
}
