//! Broker transport abstraction.
//!
//! A [`Broker`] moves opaque bytes between dot-delimited subjects with NATS
//! wildcard semantics. Subscription bookkeeping lives above it in
//! [`crate::PubSub`], so each implementation only has to provide the raw
//! primitives and acknowledge them.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BrokerResult;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish a payload. Returns once the broker accepted it.
    async fn publish(&self, subject: &str, payload: Bytes) -> BrokerResult<()>;

    /// Subscribe to a subject pattern. Returns once the broker acknowledged it.
    async fn subscribe(&self, subject: &str) -> BrokerResult<Box<dyn BrokerSubscription>>;

    /// Close the connection and release resources.
    async fn close(&self) -> BrokerResult<()>;
}

/// A live broker-level subscription.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next payload, or `None` once the subscription or broker is closed.
    async fn next(&mut self) -> Option<Bytes>;

    /// Remove the subscription. Returns once the broker acknowledged it.
    async fn unsubscribe(&mut self) -> BrokerResult<()>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn publish(&self, subject: &str, payload: Bytes) -> BrokerResult<()> {
        (**self).publish(subject, payload).await
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<Box<dyn BrokerSubscription>> {
        (**self).subscribe(subject).await
    }

    async fn close(&self) -> BrokerResult<()> {
        (**self).close().await
    }
}
