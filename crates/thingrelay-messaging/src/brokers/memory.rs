//! In-process broker.
//!
//! Every publish goes onto one broadcast channel; each subscription filters
//! it with NATS subject matching. Slow subscribers may miss messages, the
//! same at-most-once contract the network brokers give.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use thingrelay_core::subjects::subject_matches;

use crate::broker::{Broker, BrokerSubscription};
use crate::error::{BrokerError, BrokerResult};

/// Default channel capacity for the broker.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<(String, Bytes)>,
    closed: CancellationToken,
    ack_delay: Option<Duration>,
    published: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: CancellationToken::new(),
            ack_delay: None,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delay every acknowledgment, simulating a slow broker.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Number of accepted publishes.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    async fn ack(&self) -> BrokerResult<()> {
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> BrokerResult<()> {
        self.ack().await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error: nobody is listening on that subject.
        let _ = self.tx.send((subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<Box<dyn BrokerSubscription>> {
        self.ack().await?;
        Ok(Box::new(MemorySubscription {
            rx: Some(self.tx.subscribe()),
            pattern: subject.to_string(),
            closed: self.closed.clone(),
            ack_delay: self.ack_delay,
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.cancel();
        Ok(())
    }
}

struct MemorySubscription {
    rx: Option<broadcast::Receiver<(String, Bytes)>>,
    pattern: String,
    closed: CancellationToken,
    ack_delay: Option<Duration>,
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<Bytes> {
        let rx = self.rx.as_mut()?;
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => return None,
                received = rx.recv() => match received {
                    Ok((subject, payload)) => {
                        if subject_matches(&self.pattern, &subject) {
                            return Some(payload);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(pattern = %self.pattern, skipped, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> BrokerResult<()> {
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        self.rx = None;
        Ok(())
    }
}
