//! Message bus for ThingRelay.
//!
//! [`PubSub`] wraps any [`Broker`] (NATS, MQTT or in-process) with
//! `(topic, id)` subscription tracking, acknowledgment timeouts and subject
//! fan-out on publish.

pub mod broker;
pub mod brokers;
pub mod codec;
pub mod error;
pub mod handler;
pub mod pubsub;

pub use broker::{Broker, BrokerSubscription};
pub use brokers::{MemoryBroker, SharedBroker};
pub use error::{BrokerError, BrokerResult};
pub use handler::{
    ChannelHandler, MessageHandler, PubSubClient, Publisher, SharedHandler, SharedPubSub,
    Subscriber,
};
pub use pubsub::{PubSub, DEFAULT_ACK_TIMEOUT};
