use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use thingrelay_core::profile::JSON_CONTENT_TYPE;
use thingrelay_core::{Message, ProfileConfig};
use thingrelay_messaging::{MemoryBroker, PubSub, Publisher};
use thingrelay_notifiers::{
    MemoryNotifier, NotifierConfig, NotifierConsumer, NotifierRepository, Webhook,
    WebhookConsumer, WebhookRepository, WebhookSender,
};
use thingrelay_storage::MemoryBackend;

async fn capture(State(tx): State<mpsc::Sender<Value>>, Json(body): Json<Value>) {
    let _ = tx.send(body).await;
}

async fn webhook_sink() -> (String, mpsc::Receiver<Value>) {
    let (tx, rx) = mpsc::channel(8);
    let app = Router::new().route("/hook", post(capture)).with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, rx)
}

fn message(profile: ProfileConfig) -> Message {
    let mut msg = Message::new("http", "", br#"{"temp":41}"#.to_vec());
    msg.publisher = "t1".into();
    msg.created = 1;
    msg.profile = Some(profile);
    msg
}

#[tokio::test]
async fn test_webhook_receives_transformed_records() {
    let (url, mut rx) = webhook_sink().await;
    let ps = Arc::new(PubSub::new(MemoryBroker::new()));

    let repo = WebhookRepository::new(Arc::new(MemoryBackend::new()));
    repo.save(&[Webhook {
        id: "w1".into(),
        thing_id: "t1".into(),
        name: "sink".into(),
        url,
        ..Default::default()
    }])
    .unwrap();
    Arc::new(WebhookConsumer::new(repo, WebhookSender::default()))
        .start(ps.as_ref())
        .await
        .unwrap();

    let profile = ProfileConfig::new(JSON_CONTENT_TYPE).with_webhook(true);
    ps.publish(&message(profile)).await.unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body[0]["publisher"], "t1");
    assert_eq!(body[0]["payload"]["temp"], 41);
}

#[tokio::test]
async fn test_profile_notifier_is_used() {
    let ps = Arc::new(PubSub::new(MemoryBroker::new()));
    let memory = MemoryNotifier::new("memory");

    let repo = NotifierRepository::smtp(Arc::new(MemoryBackend::new()));
    repo.save(&[NotifierConfig {
        id: "n1".into(),
        name: "ops".into(),
        contacts: vec!["ops@example.com".into()],
        ..Default::default()
    }])
    .unwrap();
    Arc::new(NotifierConsumer::new(
        thingrelay_core::subjects::SMTP_SUBJECT,
        Arc::new(memory.clone()),
        repo,
    ))
    .start(ps.as_ref())
    .await
    .unwrap();

    let profile = ProfileConfig::new(JSON_CONTENT_TYPE).with_smtp("n1");
    ps.publish(&message(profile)).await.unwrap();

    for _ in 0..50 {
        if memory.count().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let sent = memory.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, vec!["ops@example.com".to_string()]);
    assert!(sent[0].1.content.contains("41"));
}
