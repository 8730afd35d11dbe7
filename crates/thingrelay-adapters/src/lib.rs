//! Protocol adapters for ThingRelay.
//!
//! Every adapter resolves the caller's thing key through the Things service,
//! builds a canonical [`Message`](thingrelay_core::Message) and hands it to the
//! message bus. The HTTP and WebSocket adapters also ship axum routers; CoAP
//! and MQTT expose service layers for an external transport to drive.

pub mod coap;
pub mod http;
pub mod ingress;
pub mod mqtt;
pub mod ws;

pub use coap::{ChannelObserver, CoapObserver, CoapService};
pub use http::HttpService;
pub use ingress::{error_response, ErrorBody};
pub use mqtt::{MqttService, Subscription, SubscriptionRepository};
pub use ws::{WsClient, WsService};
