//! Broker implementations.

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::Arc;
use std::time::Duration;

use thingrelay_core::config::{BrokerConfig, BrokerKind};

use crate::broker::Broker;
use crate::error::{BrokerError, BrokerResult};

pub use memory::MemoryBroker;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;

pub type SharedBroker = Arc<dyn Broker>;

const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Connect the broker selected by the `[broker]` section.
pub async fn connect(config: &BrokerConfig, client_id: &str) -> BrokerResult<SharedBroker> {
    match config.kind {
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "nats")]
        BrokerKind::Nats => Ok(Arc::new(
            NatsBroker::connect(&config.url, config.ack_timeout()).await?,
        )),
        #[cfg(feature = "mqtt")]
        BrokerKind::Mqtt => Ok(Arc::new(MqttBroker::connect(
            &config.url,
            client_id,
            MQTT_KEEP_ALIVE,
        )?)),
        #[allow(unreachable_patterns)]
        other => Err(BrokerError::Connect(format!(
            "broker kind {:?} is not compiled in",
            other
        ))),
    }
}
