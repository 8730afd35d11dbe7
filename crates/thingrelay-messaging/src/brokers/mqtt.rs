//! MQTT broker.
//!
//! One client connection carries every subscription. Subjects map onto MQTT
//! topics by swapping `.` for `/`, `*` for `+` and `>` for `#`. The event
//! loop task routes incoming publishes to subscriptions and re-subscribes
//! all live filters after a reconnect.
//!
//! A subscribe returns once the broker's SUBACK arrives. Subscribe requests
//! are queued to the client in the same order their waiters are queued
//! here, so the n-th outgoing SUBSCRIBE belongs to the n-th waiter and its
//! packet id then matches the SUBACK.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck, SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thingrelay_core::subjects::subject_matches;

use crate::broker::{Broker, BrokerSubscription};
use crate::error::{BrokerError, BrokerResult};

const DEFAULT_PORT: u16 = 1883;
const ROUTE_CAPACITY: usize = 256;
const RETRY_DELAY: Duration = Duration::from_secs(1);

struct Route {
    pattern: String,
    filter: String,
    tx: mpsc::Sender<Bytes>,
}

type AckSender = oneshot::Sender<BrokerResult<()>>;

/// SUBACK waiters. `None` stands for a re-subscribe nobody waits on.
#[derive(Default)]
struct Acks {
    queued: VecDeque<Option<AckSender>>,
    sent: HashMap<u16, AckSender>,
}

struct Shared {
    client: AsyncClient,
    routes: Mutex<HashMap<u64, Route>>,
    acks: Mutex<Acks>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Shared {
    /// Queue a SUBSCRIBE together with its waiter, keeping both in order.
    fn request_subscribe(&self, filter: &str, waiter: Option<AckSender>) -> BrokerResult<()> {
        let mut acks = self.acks.lock();
        acks.queued.push_back(waiter);
        if let Err(e) = self.client.try_subscribe(filter, QoS::AtLeastOnce) {
            acks.queued.pop_back();
            return Err(BrokerError::Subscribe(e.to_string()));
        }
        Ok(())
    }

    fn subscribe_sent(&self, pkid: u16) {
        let mut acks = self.acks.lock();
        if let Some(Some(waiter)) = acks.queued.pop_front() {
            acks.sent.insert(pkid, waiter);
        }
    }

    fn subscribe_acked(&self, ack: &SubAck) {
        let Some(waiter) = self.acks.lock().sent.remove(&ack.pkid) else {
            return;
        };
        let result = if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(BrokerError::Subscribe("broker refused the subscription".to_string()))
        } else {
            Ok(())
        };
        let _ = waiter.send(result);
    }

    /// Fail every SUBSCRIBE already on the wire; the connection dropped it.
    fn fail_sent(&self) {
        for (_, waiter) in self.acks.lock().sent.drain() {
            let _ = waiter.send(Err(BrokerError::Subscribe("connection lost".to_string())));
        }
    }

    /// Drop a route, returning its filter when no other route uses it.
    fn remove_route(&self, id: u64) -> Option<String> {
        let mut routes = self.routes.lock();
        routes
            .remove(&id)
            .map(|route| route.filter)
            .filter(|filter| !routes.values().any(|r| &r.filter == filter))
    }
}

pub struct MqttBroker {
    shared: Arc<Shared>,
}

impl MqttBroker {
    /// Connect to `mqtt://host[:port]` and start the event loop.
    pub fn connect(url: &str, client_id: &str, keep_alive: Duration) -> BrokerResult<Self> {
        let (host, port) = parse_broker_url(url)?;
        info!("Connecting to MQTT broker at {}:{}", host, port);

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, ROUTE_CAPACITY);
        let shared = Arc::new(Shared {
            client,
            routes: Mutex::new(HashMap::new()),
            acks: Mutex::new(Acks::default()),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_event_loop(eventloop, shared.clone()));
        Ok(Self { shared })
    }
}

async fn run_event_loop(mut eventloop: EventLoop, shared: Arc<Shared>) {
    loop {
        let event = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let subject = topic_to_subject(&publish.topic);
                let routes = shared.routes.lock();
                for route in routes.values() {
                    if subject_matches(&route.pattern, &subject)
                        && route.tx.try_send(publish.payload.clone()).is_err()
                    {
                        warn!(subject = %subject, "MQTT subscriber is full, dropping message");
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                let filters: Vec<String> = {
                    let routes = shared.routes.lock();
                    let mut filters: Vec<String> =
                        routes.values().map(|r| r.filter.clone()).collect();
                    filters.sort();
                    filters.dedup();
                    filters
                };
                for filter in filters {
                    if let Err(e) = shared.request_subscribe(&filter, None) {
                        warn!(filter = %filter, error = %e, "MQTT re-subscribe failed");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => shared.subscribe_sent(pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => shared.subscribe_acked(&ack),
            Ok(other) => debug!(event = ?other, "MQTT event"),
            Err(e) => {
                warn!(error = %e, "MQTT connection error, reconnecting");
                shared.fail_sent();
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> BrokerResult<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.shared
            .client
            .publish(subject_to_topic(subject), QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<Box<dyn BrokerSubscription>> {
        if self.shared.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let filter = subject_to_topic(subject);

        // Routed before the SUBACK so nothing delivered right after it is lost.
        let (tx, rx) = mpsc::channel(ROUTE_CAPACITY);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.routes.lock().insert(
            id,
            Route {
                pattern: subject.to_string(),
                filter: filter.clone(),
                tx,
            },
        );
        let mut subscription = MqttSubscription {
            id,
            rx,
            shared: self.shared.clone(),
            active: true,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if let Err(e) = self.shared.request_subscribe(&filter, Some(ack_tx)) {
            subscription.detach();
            return Err(e);
        }
        let acked = tokio::select! {
            _ = self.shared.shutdown.cancelled() => Err(BrokerError::Closed),
            ack = ack_rx => ack.unwrap_or_else(|_| {
                Err(BrokerError::Subscribe("subscription dropped before SUBACK".to_string()))
            }),
        };
        if let Err(e) = acked {
            subscription.detach();
            return Err(e);
        }
        Ok(Box::new(subscription))
    }

    async fn close(&self) -> BrokerResult<()> {
        info!("Closing MQTT connection");
        self.shared.routes.lock().clear();
        let result = self
            .shared
            .client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()));
        self.shared.shutdown.cancel();
        result
    }
}

struct MqttSubscription {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    active: bool,
}

impl MqttSubscription {
    /// Remove the route once, returning a filter nobody else uses.
    fn detach(&mut self) -> Option<String> {
        if !self.active {
            return None;
        }
        self.active = false;
        self.shared.remove_route(self.id)
    }
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        if let Some(filter) = self.detach() {
            if !self.shared.shutdown.is_cancelled() {
                if let Err(e) = self.shared.client.try_unsubscribe(filter.clone()) {
                    debug!(filter = %filter, error = %e, "MQTT unsubscribe on drop failed");
                }
            }
        }
    }
}

#[async_trait]
impl BrokerSubscription for MqttSubscription {
    async fn next(&mut self) -> Option<Bytes> {
        if !self.active {
            return None;
        }
        tokio::select! {
            _ = self.shared.shutdown.cancelled() => None,
            payload = self.rx.recv() => payload,
        }
    }

    async fn unsubscribe(&mut self) -> BrokerResult<()> {
        match self.detach() {
            Some(filter) if !self.shared.shutdown.is_cancelled() => self
                .shared
                .client
                .unsubscribe(filter)
                .await
                .map_err(|e| BrokerError::Unsubscribe(e.to_string())),
            _ => Ok(()),
        }
    }
}

/// `a.*.>` becomes `a/+/#`.
pub fn subject_to_topic(subject: &str) -> String {
    subject
        .split('.')
        .map(|token| match token {
            "*" => "+",
            ">" => "#",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `a/b/c` becomes `a.b.c`.
pub fn topic_to_subject(topic: &str) -> String {
    topic.replace('/', ".")
}

fn parse_broker_url(url: &str) -> BrokerResult<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');
    if rest.is_empty() {
        return Err(BrokerError::Connect(format!("invalid MQTT url {:?}", url)));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| BrokerError::Connect(format!("invalid MQTT port in {:?}", url)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}
