//! Publish/subscribe contracts used by adapters and consumers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use thingrelay_core::{Error, Message, Result};

/// Receives messages delivered to a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Returning [`Error::SubscriptionCancelled`] drops
    /// the subscription; any other error is logged and delivery continues.
    async fn handle(&self, msg: Message) -> Result<()>;

    /// Called once when the subscription is torn down.
    fn cancel(&self) -> Result<()> {
        Ok(())
    }
}

pub type SharedHandler = Arc<dyn MessageHandler>;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish to every subject derived from the message's profile and subtopic.
    async fn publish(&self, msg: &Message) -> Result<()>;

    /// Publish a copy of the message addressed to one subject.
    async fn publish_to(&self, subject: &str, msg: &Message) -> Result<()>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Register `handler` for `(topic, id)`, replacing any previous registration.
    async fn subscribe(&self, id: &str, topic: &str, handler: SharedHandler) -> Result<()>;

    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()>;
}

/// Both halves of the bus.
#[async_trait]
pub trait PubSubClient: Publisher + Subscriber {
    async fn close(&self) -> Result<()>;
}

pub type SharedPubSub = Arc<dyn PubSubClient>;

/// Forwards delivered messages into a channel.
///
/// A closed receiver cancels the subscription.
pub struct ChannelHandler {
    tx: mpsc::Sender<Message>,
}

impl ChannelHandler {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| Error::SubscriptionCancelled)
    }
}
