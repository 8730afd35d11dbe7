//! NATS broker.
//!
//! Subscribe and unsubscribe are acknowledged by a flush round trip. The
//! client reconnects without limit, so publish failures only surface while
//! the connection is down.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use crate::broker::{Broker, BrokerSubscription};
use crate::error::{BrokerError, BrokerResult};

pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    pub async fn connect(url: &str, timeout: Duration) -> BrokerResult<Self> {
        info!("Connecting to NATS at {} (timeout={:?})", url, timeout);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => tracing::warn!("NATS disconnected"),
                    async_nats::Event::Connected => tracing::info!("NATS connected"),
                    other => tracing::debug!(event = %other, "NATS event"),
                }
            })
            .connect(url)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        info!("Successfully connected to NATS");
        Ok(Self { client })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    async fn flush(&self) -> BrokerResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> BrokerResult<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<Box<dyn BrokerSubscription>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        self.flush().await?;

        Ok(Box::new(NatsSubscription {
            subscriber: Some(subscriber),
            client: self.client.clone(),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        info!("Closing NATS connection");
        self.flush().await
    }
}

struct NatsSubscription {
    subscriber: Option<async_nats::Subscriber>,
    client: async_nats::Client,
}

#[async_trait]
impl BrokerSubscription for NatsSubscription {
    async fn next(&mut self) -> Option<Bytes> {
        let subscriber = self.subscriber.as_mut()?;
        subscriber.next().await.map(|msg| msg.payload)
    }

    async fn unsubscribe(&mut self) -> BrokerResult<()> {
        let Some(mut subscriber) = self.subscriber.take() else {
            return Ok(());
        };
        subscriber
            .unsubscribe()
            .await
            .map_err(|e| BrokerError::Unsubscribe(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Unsubscribe(e.to_string()))
    }
}
