use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use thingrelay_core::message::PROTOCOL_HTTP_DOWNLINK;
use thingrelay_core::profile::SENML_CONTENT_TYPE;
use thingrelay_core::{InMemoryThings, ProfileConfig, SharedThings};
use thingrelay_downlinks::error::Result;
use thingrelay_downlinks::{
    Downlink, DownlinkExecutor, DownlinkRunner, DownlinkScheduler, Frequency, HttpClient,
    HttpRequest, HttpResponse, Scheduler,
};
use thingrelay_messaging::{ChannelHandler, MemoryBroker, PubSub, Subscriber};

#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<(String, Instant)>>,
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.calls.lock().push((request.url, Instant::now()));
        Ok(HttpResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: br#"{"ok":true}"#.to_vec(),
        })
    }
}

fn things() -> SharedThings {
    Arc::new(InMemoryThings::new().with_thing(
        "t1",
        "g1",
        "k1",
        ProfileConfig::new(SENML_CONTENT_TYPE).with_write(true),
    ))
}

fn downlink(id: &str, url: &str) -> Downlink {
    Downlink {
        id: id.into(),
        thing_id: "t1".into(),
        url: url.into(),
        ..Default::default()
    }
}

fn call_time(client: &RecordingClient, url: &str) -> Instant {
    client
        .calls
        .lock()
        .iter()
        .find(|(u, _)| u == url)
        .map(|(_, at)| *at)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_same_host_calls_are_spaced() {
    let ps = Arc::new(PubSub::new(MemoryBroker::new()));
    let client = Arc::new(RecordingClient::default());
    let executor = Arc::new(DownlinkExecutor::new(things(), ps, client.clone()));

    let a = downlink("a", "http://meter.local/read?n=1");
    let b = downlink("b", "http://meter.local/read?n=2");
    let c = downlink("c", "http://other.local/read");

    let (ra, rb, rc) = tokio::join!(executor.execute(&a), executor.execute(&b), executor.execute(&c));
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    let ta = call_time(&client, &a.url);
    let tb = call_time(&client, &b.url);
    let tc = call_time(&client, &c.url);

    let gap = if ta > tb { ta - tb } else { tb - ta };
    assert!(gap >= Duration::from_millis(2_500), "gap was {:?}", gap);
    assert_eq!(tc, ta.min(tb));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_one_time_downlink_publishes() {
    let ps = Arc::new(PubSub::new(MemoryBroker::new()));
    let (tap, mut rx) = ChannelHandler::new(4);
    ps.subscribe("tap", "json.messages", tap).await.unwrap();

    let client = Arc::new(RecordingClient::default());
    let executor = Arc::new(DownlinkExecutor::new(things(), ps.clone(), client.clone()));
    let stats = executor.stats();
    let scheduler = DownlinkScheduler::new(executor as Arc<dyn DownlinkRunner>);

    let mut d = downlink("once", "http://meter.local/read");
    d.scheduler = Scheduler {
        frequency: Frequency::Once,
        date_time: (Utc::now() + chrono::Duration::seconds(30))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        ..Default::default()
    };
    assert!(scheduler.schedule(d).unwrap());

    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.protocol, PROTOCOL_HTTP_DOWNLINK);
    assert_eq!(msg.publisher, "t1");
    assert_eq!(msg.payload, br#"{"ok":true}"#.to_vec());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(client.calls.lock().len(), 1);
    assert_eq!(stats.snapshot().published, 1);
    assert!(scheduler.scheduled_ids().is_empty());
}
