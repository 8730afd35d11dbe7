//! Subscription bookkeeping over a [`Broker`].
//!
//! [`PubSub`] keeps at most one live broker subscription per `(topic, id)`.
//! The map is guarded by one mutex that is never held across broker I/O:
//! a registration is taken out of the map first, then torn down.
//!
//! Each registration runs a dispatch task that owns the broker subscription:
//!
//! ```text
//! broker ──▶ dispatch task ──decode──▶ handler.handle(msg)
//!                 ▲
//!   stop(ack) ────┘  unsubscribe, then reply on ack
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use thingrelay_core::subjects::{get_subjects, notification_subjects};
use thingrelay_core::{Error, Message, Result};

use crate::broker::{Broker, BrokerSubscription};
use crate::codec;
use crate::error::BrokerResult;
use crate::handler::{PubSubClient, Publisher, SharedHandler, Subscriber};

/// Default bound on broker acknowledgments.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

type AckSender = oneshot::Sender<BrokerResult<()>>;

struct Registration {
    token: u64,
    handler: SharedHandler,
    stop: oneshot::Sender<AckSender>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    topics: Mutex<HashMap<String, HashMap<String, Registration>>>,
    next_token: AtomicU64,
}

impl Registry {
    fn insert(&self, topic: &str, id: &str, registration: Registration) -> Option<Registration> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .insert(id.to_string(), registration)
    }

    fn take(&self, topic: &str, id: &str) -> Option<Registration> {
        let mut topics = self.topics.lock();
        let subscribers = topics.get_mut(topic)?;
        let registration = subscribers.remove(id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        registration
    }

    /// Remove a registration only if it is still the one identified by `token`.
    fn take_if(&self, topic: &str, id: &str, token: u64) -> Option<Registration> {
        let mut topics = self.topics.lock();
        let subscribers = topics.get_mut(topic)?;
        if subscribers.get(id).map(|r| r.token) != Some(token) {
            return None;
        }
        let registration = subscribers.remove(id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        registration
    }

    fn drain(&self) -> Vec<Registration> {
        self.topics
            .lock()
            .drain()
            .flat_map(|(_, subscribers)| subscribers.into_values())
            .collect()
    }
}

/// Broker adapter with per-`(topic, id)` subscription tracking.
pub struct PubSub<B: Broker> {
    broker: Arc<B>,
    registry: Arc<Registry>,
    ack_timeout: Duration,
}

impl<B: Broker> Clone for PubSub<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            registry: self.registry.clone(),
            ack_timeout: self.ack_timeout,
        }
    }
}

impl<B: Broker> PubSub<B> {
    pub fn new(broker: B) -> Self {
        Self::with_timeout(broker, DEFAULT_ACK_TIMEOUT)
    }

    pub fn with_timeout(broker: B, ack_timeout: Duration) -> Self {
        Self {
            broker: Arc::new(broker),
            registry: Arc::new(Registry::default()),
            ack_timeout,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Number of live registrations across all topics.
    pub fn subscription_count(&self) -> usize {
        self.registry.topics.lock().values().map(HashMap::len).sum()
    }

    /// Number of topics with at least one registration.
    pub fn topic_count(&self) -> usize {
        self.registry.topics.lock().len()
    }

    pub fn is_subscribed(&self, id: &str, topic: &str) -> bool {
        self.registry
            .topics
            .lock()
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains_key(id))
    }

    /// Cancel the handler, unsubscribe at the broker, and wait for the ack.
    ///
    /// An unsubscribe failure wins over a cancel failure.
    async fn teardown(&self, registration: Registration) -> Result<()> {
        let Registration {
            handler, stop, task, ..
        } = registration;

        let cancelled = handler.cancel();

        let (ack_tx, ack_rx) = oneshot::channel();
        let unsubscribed = if stop.send(ack_tx).is_err() {
            // Dispatch task already finished and released its subscription.
            Ok(())
        } else {
            match timeout(self.ack_timeout, ack_rx).await {
                Ok(Ok(result)) => result.map_err(Error::from),
                Ok(Err(_)) => Ok(()),
                Err(_) => {
                    task.abort();
                    Err(Error::UnsubscribeTimeout)
                }
            }
        };

        unsubscribed?;
        cancelled
    }

    async fn subscribe_inner(&self, id: &str, topic: &str, handler: SharedHandler) -> Result<()> {
        if id.is_empty() {
            return Err(Error::EmptyId);
        }
        if topic.is_empty() {
            return Err(Error::EmptyTopic);
        }

        if let Some(previous) = self.registry.take(topic, id) {
            tracing::debug!(id, topic, "Replacing existing subscription");
            self.teardown(previous).await?;
        }

        let subscription = timeout(self.ack_timeout, self.broker.subscribe(topic))
            .await
            .map_err(|_| Error::SubscribeTimeout)??;

        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(dispatch(
            subscription,
            handler.clone(),
            stop_rx,
            Arc::downgrade(&self.registry),
            topic.to_string(),
            id.to_string(),
            token,
        ));

        let displaced = self.registry.insert(
            topic,
            id,
            Registration {
                token,
                handler,
                stop: stop_tx,
                task,
            },
        );

        // A concurrent subscribe for the same pair finished first.
        if let Some(displaced) = displaced {
            if let Err(e) = self.teardown(displaced).await {
                tracing::warn!(id, topic, error = %e, "Failed to release displaced subscription");
            }
        }

        Ok(())
    }

    async fn unsubscribe_inner(&self, id: &str, topic: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::EmptyId);
        }
        if topic.is_empty() {
            return Err(Error::EmptyTopic);
        }

        let registration = self
            .registry
            .take(topic, id)
            .ok_or(Error::NotSubscribed)?;
        self.teardown(registration).await
    }

    /// Tear down every registration, then close the broker.
    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for registration in self.registry.drain() {
            if let Err(e) = self.teardown(registration).await {
                tracing::warn!(error = %e, "Failed to release subscription on close");
                first_error.get_or_insert(e);
            }
        }

        self.broker.close().await?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn dispatch(
    mut subscription: Box<dyn BrokerSubscription>,
    handler: SharedHandler,
    mut stop: oneshot::Receiver<AckSender>,
    registry: std::sync::Weak<Registry>,
    topic: String,
    id: String,
    token: u64,
) {
    loop {
        tokio::select! {
            biased;
            ack = &mut stop => {
                let result = subscription.unsubscribe().await;
                if let Ok(ack) = ack {
                    let _ = ack.send(result);
                }
                return;
            }
            next = subscription.next() => {
                let Some(bytes) = next else {
                    tracing::debug!(id = %id, topic = %topic, "Broker subscription ended");
                    return;
                };

                let msg = match codec::decode(&bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(id = %id, topic = %topic, error = %e, "Dropping undecodable message");
                        continue;
                    }
                };

                match handler.handle(msg).await {
                    Ok(()) => {}
                    Err(Error::SubscriptionCancelled) => {
                        tracing::debug!(id = %id, topic = %topic, "Handler cancelled subscription");
                        // Only the side that removes the registration calls cancel.
                        let removed = registry
                            .upgrade()
                            .and_then(|registry| registry.take_if(&topic, &id, token));
                        if removed.is_some() {
                            if let Err(e) = handler.cancel() {
                                tracing::warn!(id = %id, topic = %topic, error = %e, "Handler cancel failed");
                            }
                        }
                        if let Err(e) = subscription.unsubscribe().await {
                            tracing::warn!(id = %id, topic = %topic, error = %e, "Broker unsubscribe failed");
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, topic = %topic, error = %e, "Message handler failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<B: Broker> Publisher for PubSub<B> {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let profile = msg.profile.as_ref();
        let mut subjects = get_subjects(profile, &msg.subtopic);
        subjects.extend(notification_subjects(profile));

        for subject in subjects {
            self.publish_to(&subject, msg).await?;
        }
        Ok(())
    }

    async fn publish_to(&self, subject: &str, msg: &Message) -> Result<()> {
        let payload = codec::encode(&msg.with_subject(subject))?;
        timeout(self.ack_timeout, self.broker.publish(subject, payload))
            .await
            .map_err(|_| Error::PublishTimeout)??;
        Ok(())
    }
}

#[async_trait]
impl<B: Broker> Subscriber for PubSub<B> {
    async fn subscribe(&self, id: &str, topic: &str, handler: SharedHandler) -> Result<()> {
        self.subscribe_inner(id, topic, handler).await
    }

    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()> {
        self.unsubscribe_inner(id, topic).await
    }
}

#[async_trait]
impl<B: Broker> PubSubClient for PubSub<B> {
    async fn close(&self) -> Result<()> {
        PubSub::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::memory::MemoryBroker;
    use crate::handler::{ChannelHandler, MessageHandler};
    use std::sync::atomic::AtomicUsize;
    use thingrelay_core::profile::{ProfileConfig, JSON_CONTENT_TYPE};

    struct CountingHandler {
        handled: AtomicUsize,
        cancelled: AtomicUsize,
        fail_cancel: bool,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handled: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                fail_cancel: false,
            })
        }

        fn failing_cancel() -> Arc<Self> {
            Arc::new(Self {
                handled: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                fail_cancel: true,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _msg: Message) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self) -> Result<()> {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel {
                Err(Error::Internal("cancel failed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn pubsub() -> PubSub<MemoryBroker> {
        PubSub::with_timeout(MemoryBroker::new(), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_rejects_empty_id_and_topic() {
        let ps = pubsub();
        let h = CountingHandler::new();
        assert!(matches!(
            ps.subscribe("", "messages", h.clone()).await,
            Err(Error::EmptyId)
        ));
        assert!(matches!(
            ps.subscribe("c1", "", h).await,
            Err(Error::EmptyTopic)
        ));
        assert_eq!(ps.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_and_cancels_once() {
        let ps = pubsub();
        let first = CountingHandler::new();
        let second = CountingHandler::new();

        ps.subscribe("c1", "messages.>", first.clone()).await.unwrap();
        ps.subscribe("c1", "messages.>", second.clone()).await.unwrap();

        assert_eq!(ps.subscription_count(), 1);
        assert_eq!(first.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(second.cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_pair() {
        let ps = pubsub();
        ps.subscribe("c1", "messages", CountingHandler::new())
            .await
            .unwrap();

        assert!(matches!(
            ps.unsubscribe("c2", "messages").await,
            Err(Error::NotSubscribed)
        ));
        assert!(matches!(
            ps.unsubscribe("c1", "other").await,
            Err(Error::NotSubscribed)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_empty_topic() {
        let ps = pubsub();
        ps.subscribe("c1", "messages", CountingHandler::new())
            .await
            .unwrap();
        ps.subscribe("c2", "messages", CountingHandler::new())
            .await
            .unwrap();
        assert_eq!(ps.topic_count(), 1);

        ps.unsubscribe("c1", "messages").await.unwrap();
        assert_eq!(ps.topic_count(), 1);
        ps.unsubscribe("c2", "messages").await.unwrap();
        assert_eq!(ps.topic_count(), 0);
        assert!(matches!(
            ps.unsubscribe("c2", "messages").await,
            Err(Error::NotSubscribed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_error_is_returned() {
        let ps = pubsub();
        let h = CountingHandler::failing_cancel();
        ps.subscribe("c1", "messages", h.clone()).await.unwrap();

        let err = ps.unsubscribe("c1", "messages").await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!ps.is_subscribed("c1", "messages"));
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_derived_subjects() {
        let ps = pubsub();
        let (all, mut all_rx) = ChannelHandler::new(16);
        ps.subscribe("tap", ">", all).await.unwrap();

        let mut msg = Message::new("http", "room.1", br#"{"t":1}"#.to_vec());
        msg.profile = Some(
            ProfileConfig::new(JSON_CONTENT_TYPE)
                .with_write(true)
                .with_webhook(true),
        );
        ps.publish(&msg).await.unwrap();

        let mut subjects = Vec::new();
        for _ in 0..3 {
            subjects.push(all_rx.recv().await.unwrap().subject);
        }
        assert_eq!(
            subjects,
            vec!["messages.room.1", "json.messages.room.1", "webhook"]
        );
    }

    #[tokio::test]
    async fn test_handler_cancellation_drops_registration() {
        let ps = pubsub();
        let (handler, rx) = ChannelHandler::new(1);
        ps.subscribe("c1", "messages", handler).await.unwrap();
        drop(rx);

        ps.publish(&Message::new("http", "", b"x".to_vec()))
            .await
            .unwrap();

        for _ in 0..50 {
            if !ps.is_subscribed("c1", "messages") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!ps.is_subscribed("c1", "messages"));
    }

    #[tokio::test]
    async fn test_timeouts() {
        let broker = MemoryBroker::new().with_ack_delay(Duration::from_millis(200));
        let ps = PubSub::with_timeout(broker, Duration::from_millis(50));

        assert!(matches!(
            ps.subscribe("c1", "messages", CountingHandler::new()).await,
            Err(Error::SubscribeTimeout)
        ));
        assert!(matches!(
            ps.publish(&Message::new("http", "", b"x".to_vec())).await,
            Err(Error::PublishTimeout)
        ));
    }

    #[tokio::test]
    async fn test_close_releases_everything() {
        let ps = pubsub();
        let h = CountingHandler::new();
        ps.subscribe("c1", "a", h.clone()).await.unwrap();
        ps.subscribe("c2", "b", h.clone()).await.unwrap();

        ps.close().await.unwrap();
        assert_eq!(ps.subscription_count(), 0);
        assert_eq!(h.cancelled.load(Ordering::SeqCst), 2);
    }
}
