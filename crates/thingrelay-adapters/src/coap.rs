//! CoAP adapter service.
//!
//! A GET with the Observe option maps to [`CoapService::subscribe`], keyed by
//! the request token; the matching deregistration maps to
//! [`CoapService::unsubscribe`]. Live observers are tracked in a token map so
//! the transport can find them again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use thingrelay_core::message::PROTOCOL_COAP;
use thingrelay_core::profile::{CBOR_CONTENT_TYPE, JSON_CONTENT_TYPE, SENML_CONTENT_TYPE};
use thingrelay_core::subjects::subscription_subject;
use thingrelay_core::{Error, Message, Result, SharedThings, ThingKey};
use thingrelay_messaging::{MessageHandler, SharedPubSub};

use crate::ingress;

/// Observe sequence numbers are 24 bits wide.
const OBSERVE_MASK: u32 = 0x00FF_FFFF;

/// A client observing a resource.
#[async_trait]
pub trait CoapObserver: Send + Sync {
    /// Request token identifying the observation.
    fn token(&self) -> &str;

    /// Send one notification carrying observe sequence number `observe`.
    async fn notify(&self, msg: &Message, observe: u32) -> Result<()>;

    /// The observation has ended.
    fn cancel(&self) -> Result<()> {
        Ok(())
    }
}

type ObserverMap = Arc<Mutex<HashMap<String, Arc<Observation>>>>;

struct Observation {
    observer: Arc<dyn CoapObserver>,
    sequence: AtomicU32,
    observers: ObserverMap,
}

#[async_trait]
impl MessageHandler for Observation {
    async fn handle(&self, msg: Message) -> Result<()> {
        let observe = self.sequence.fetch_add(1, Ordering::Relaxed) & OBSERVE_MASK;
        self.observer.notify(&msg, observe).await
    }

    fn cancel(&self) -> Result<()> {
        {
            let mut observers = self.observers.lock();
            let token = self.observer.token();
            if observers
                .get(token)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self))
            {
                observers.remove(token);
            }
        }
        self.observer.cancel()
    }
}

pub struct CoapService {
    things: SharedThings,
    pubsub: SharedPubSub,
    observers: ObserverMap,
}

impl CoapService {
    pub fn new(things: SharedThings, pubsub: SharedPubSub) -> Self {
        Self {
            things,
            pubsub,
            observers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn publish(&self, key: &ThingKey, subtopic: &str, payload: Vec<u8>) -> Result<Message> {
        ingress::publish(
            self.things.as_ref(),
            self.pubsub.as_ref(),
            key,
            PROTOCOL_COAP,
            subtopic,
            payload,
        )
        .await
    }

    pub async fn subscribe(
        &self,
        key: &ThingKey,
        subtopic: &str,
        observer: Arc<dyn CoapObserver>,
    ) -> Result<()> {
        let subject = subscription_subject(subtopic)?;
        ingress::resolve(self.things.as_ref(), key).await?;

        let token = observer.token().to_string();
        let observation = Arc::new(Observation {
            observer,
            sequence: AtomicU32::new(0),
            observers: self.observers.clone(),
        });

        self.pubsub
            .subscribe(&token, &subject, observation.clone())
            .await?;
        self.observers.lock().insert(token.clone(), observation);
        debug!(token = %token, subject = %subject, "CoAP observer registered");
        Ok(())
    }

    pub async fn unsubscribe(&self, key: &ThingKey, subtopic: &str, token: &str) -> Result<()> {
        let subject = subscription_subject(subtopic)?;
        ingress::resolve(self.things.as_ref(), key).await?;

        self.pubsub.unsubscribe(token, &subject).await
    }

    pub fn is_observing(&self, token: &str) -> bool {
        self.observers.lock().contains_key(token)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

/// CoAP response code (class, detail) for an error.
pub fn response_code(err: &Error) -> (u8, u8) {
    err.status().coap_code()
}

/// CoAP Content-Format option value for a content type.
pub fn content_format_option(content_type: &str) -> Option<u16> {
    match content_type {
        SENML_CONTENT_TYPE => Some(110),
        CBOR_CONTENT_TYPE => Some(112),
        JSON_CONTENT_TYPE => Some(50),
        _ => None,
    }
}

/// Observer that queues notifications on a channel for a transport task.
pub struct ChannelObserver {
    token: String,
    tx: mpsc::Sender<(u32, Message)>,
}

impl ChannelObserver {
    pub fn new(token: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<(u32, Message)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                token: token.into(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl CoapObserver for ChannelObserver {
    fn token(&self) -> &str {
        &self.token
    }

    async fn notify(&self, msg: &Message, observe: u32) -> Result<()> {
        self.tx
            .send((observe, msg.clone()))
            .await
            .map_err(|_| Error::SubscriptionCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thingrelay_core::{InMemoryThings, ProfileConfig};
    use thingrelay_messaging::{MemoryBroker, PubSub};

    fn service() -> (CoapService, PubSub<MemoryBroker>) {
        let things = InMemoryThings::new()
            .with_thing("t1", "g1", "k1", ProfileConfig::new(SENML_CONTENT_TYPE));
        let pubsub = PubSub::new(MemoryBroker::new());
        (
            CoapService::new(Arc::new(things), Arc::new(pubsub.clone())),
            pubsub,
        )
    }

    #[tokio::test]
    async fn test_observe_sequence() {
        let (service, _pubsub) = service();
        let key = ThingKey::internal("k1");
        let (observer, mut rx) = ChannelObserver::new("tok", 8);
        service.subscribe(&key, "temp", observer).await.unwrap();
        assert!(service.is_observing("tok"));

        service.publish(&key, "temp", b"1".to_vec()).await.unwrap();
        service.publish(&key, "temp", b"2".to_vec()).await.unwrap();

        let (first, msg) = rx.recv().await.unwrap();
        assert_eq!((first, msg.payload.as_slice()), (0, b"1".as_slice()));
        let (second, _) = rx.recv().await.unwrap();
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_unobserve() {
        let (service, pubsub) = service();
        let key = ThingKey::internal("k1");
        let (observer, _rx) = ChannelObserver::new("tok", 8);
        service.subscribe(&key, "", observer).await.unwrap();

        service.unsubscribe(&key, "", "tok").await.unwrap();
        assert_eq!(service.observer_count(), 0);
        assert_eq!(pubsub.subscription_count(), 0);
        assert!(matches!(
            service.unsubscribe(&key, "", "tok").await,
            Err(Error::NotSubscribed)
        ));
    }

    #[tokio::test]
    async fn test_closed_observer_is_forgotten() {
        let (service, _pubsub) = service();
        let key = ThingKey::internal("k1");
        let (observer, rx) = ChannelObserver::new("tok", 1);
        service.subscribe(&key, "", observer).await.unwrap();
        drop(rx);

        service.publish(&key, "", b"x".to_vec()).await.unwrap();
        for _ in 0..50 {
            if !service.is_observing("tok") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!service.is_observing("tok"));
    }

    #[tokio::test]
    async fn test_bad_key_registers_nothing() {
        let (service, _) = service();
        let (observer, _rx) = ChannelObserver::new("tok", 8);
        let err = service
            .subscribe(&ThingKey::internal("bad"), "", observer)
            .await
            .unwrap_err();
        assert_eq!(response_code(&err), (4, 3));
        assert_eq!(service.observer_count(), 0);
    }

    #[test]
    fn test_content_format_option() {
        assert_eq!(content_format_option(SENML_CONTENT_TYPE), Some(110));
        assert_eq!(content_format_option("text/plain"), None);
    }
}
