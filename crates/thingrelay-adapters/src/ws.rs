//! WebSocket adapter.
//!
//! A connection on `/ws/messages[/<subtopic>]` subscribes its thing to that
//! subtopic and publishes every frame it sends. Messages the thing published
//! itself are not echoed back.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use thingrelay_core::message::PROTOCOL_WEBSOCKET;
use thingrelay_core::subjects::subscription_subject;
use thingrelay_core::{Error, Message, Result, SharedThings, ThingKey};
use thingrelay_messaging::{MessageHandler, SharedPubSub};

use crate::ingress::{self, error_response, key_from_headers, key_from_parts, ErrorBody};

const WS_PATH: &str = "/ws/messages";
const CLIENT_BUFFER: usize = 64;

/// Subscription handler for one WebSocket connection.
pub struct WsClient {
    thing_id: String,
    tx: mpsc::Sender<Message>,
}

impl WsClient {
    pub fn new(thing_id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                thing_id: thing_id.into(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl MessageHandler for WsClient {
    async fn handle(&self, msg: Message) -> Result<()> {
        if msg.publisher == self.thing_id {
            return Ok(());
        }
        self.tx
            .send(msg)
            .await
            .map_err(|_| Error::SubscriptionCancelled)
    }
}

pub struct WsService {
    things: SharedThings,
    pubsub: SharedPubSub,
}

impl WsService {
    pub fn new(things: SharedThings, pubsub: SharedPubSub) -> Self {
        Self { things, pubsub }
    }

    pub async fn publish(&self, key: &ThingKey, subtopic: &str, payload: Vec<u8>) -> Result<Message> {
        ingress::publish(
            self.things.as_ref(),
            self.pubsub.as_ref(),
            key,
            PROTOCOL_WEBSOCKET,
            subtopic,
            payload,
        )
        .await
    }

    /// Subscribe the key's thing to `subtopic`; deliveries arrive on the
    /// returned receiver until the subscription is replaced or dropped.
    pub async fn subscribe(&self, key: &ThingKey, subtopic: &str) -> Result<mpsc::Receiver<Message>> {
        let subject = subscription_subject(subtopic)?;
        let pub_config = ingress::resolve(self.things.as_ref(), key).await?;

        let (client, rx) = WsClient::new(pub_config.publisher_id.clone(), CLIENT_BUFFER);
        self.pubsub
            .subscribe(&pub_config.publisher_id, &subject, client)
            .await?;
        Ok(rx)
    }

    pub async fn unsubscribe(&self, key: &ThingKey, subtopic: &str) -> Result<()> {
        let subject = subscription_subject(subtopic)?;
        let pub_config = ingress::resolve(self.things.as_ref(), key).await?;
        self.pubsub
            .unsubscribe(&pub_config.publisher_id, &subject)
            .await
    }

    async fn authorize(&self, key: &ThingKey) -> Result<()> {
        ingress::resolve(self.things.as_ref(), key).await.map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    authorization: Option<String>,
    key_type: Option<String>,
}

pub fn router(service: Arc<WsService>) -> Router {
    Router::new()
        .route(WS_PATH, get(upgrade_handler))
        .route("/ws/messages/*subtopic", get(upgrade_handler))
        .with_state(service)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<WsService>>,
    Query(query): Query<WsQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let subtopic = uri
        .path()
        .strip_prefix(WS_PATH)
        .unwrap_or_default()
        .to_string();

    let key = match &query.authorization {
        Some(value) => key_from_parts(value, query.key_type.as_deref().unwrap_or_default()),
        None => key_from_headers(&headers),
    };
    let key = match key {
        Ok(key) => key,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = subscription_subject(&subtopic) {
        return error_response(&e);
    }
    if let Err(e) = service.authorize(&key).await {
        return error_response(&e);
    }

    ws.on_upgrade(move |socket| run_session(service, socket, key, subtopic))
}

async fn run_session(service: Arc<WsService>, socket: WebSocket, key: ThingKey, subtopic: String) {
    let mut deliveries = match service.subscribe(&key, &subtopic).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(subtopic = %subtopic, error = %e, "WebSocket subscribe failed");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let mut displaced = false;

    loop {
        tokio::select! {
            delivery = deliveries.recv() => match delivery {
                Some(msg) => {
                    if sink.send(payload_frame(msg.payload)).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Another connection for the same thing took the subscription.
                    displaced = true;
                    break;
                }
            },
            frame = stream.next() => {
                let payload = match frame {
                    Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                if let Err(e) = service.publish(&key, &subtopic, payload).await {
                    warn!(subtopic = %subtopic, error = %e, "WebSocket publish failed");
                    let body = ErrorBody { error: e.to_string() };
                    let text = serde_json::to_string(&body).unwrap_or_default();
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if !displaced {
        if let Err(e) = service.unsubscribe(&key, &subtopic).await {
            debug!(subtopic = %subtopic, error = %e, "WebSocket unsubscribe failed");
        }
    }
}

fn payload_frame(payload: Vec<u8>) -> WsMessage {
    match String::from_utf8(payload) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => WsMessage::Binary(e.into_bytes()),
    }
}
