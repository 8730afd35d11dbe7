//! HTTP ingress served over a real socket.

use std::sync::Arc;

use thingrelay_adapters::http::{router, HttpService};
use thingrelay_adapters::ErrorBody;
use thingrelay_core::profile::JSON_CONTENT_TYPE;
use thingrelay_core::{InMemoryThings, ProfileConfig};
use thingrelay_messaging::{ChannelHandler, MemoryBroker, PubSub, Subscriber};

async fn serve() -> (String, PubSub<MemoryBroker>) {
    let things = InMemoryThings::new().with_thing(
        "t1",
        "g1",
        "secret",
        ProfileConfig::new(JSON_CONTENT_TYPE).with_write(true),
    );
    let pubsub = PubSub::new(MemoryBroker::new());
    let service = Arc::new(HttpService::new(Arc::new(things), Arc::new(pubsub.clone())));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    (format!("http://{}", addr), pubsub)
}

#[tokio::test]
async fn test_post_publishes_to_storage_subject() {
    let (base, pubsub) = serve().await;
    let (tap, mut rx) = ChannelHandler::new(8);
    pubsub.subscribe("tap", "json.messages.>", tap).await.unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/messages/building%2F1/temp", base))
        .header("Authorization", "Thing secret")
        .body(r#"{"temp":21}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.subject, "json.messages.building.1.temp");
    assert_eq!(msg.publisher, "t1");
    assert_eq!(msg.payload, br#"{"temp":21}"#);
}

#[tokio::test]
async fn test_status_mapping() {
    let (base, _pubsub) = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/messages", base))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/messages", base))
        .header("Authorization", "wrong")
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(body.error.starts_with("Authorization failed"));

    let resp = client
        .post(format!("{}/messages/bad*topic", base))
        .header("Authorization", "secret")
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
