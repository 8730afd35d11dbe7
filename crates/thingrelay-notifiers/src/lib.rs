//! Notifications for ThingRelay.
//!
//! Consumers on the `smtp`, `smpp` and `webhook` subjects turn messages into
//! emails, SMS and webhook calls. Targets are stored per group (notifiers)
//! or per thing (webhooks).

pub mod consumer;
pub mod error;
pub mod model;
pub mod notifier;
pub mod repository;
pub mod service;
pub mod smpp;

#[cfg(feature = "email")]
pub mod smtp;

#[cfg(feature = "webhook")]
pub mod webhook;

pub use consumer::NotifierConsumer;
pub use error::NotifierError;
pub use model::{Notification, NotifierConfig, Webhook};
pub use notifier::{MemoryNotifier, Notifier, SharedNotifier};
pub use repository::{NotifierRepository, WebhookRepository};
pub use service::{NotifiersService, WebhooksService};
pub use smpp::SmppNotifier;

#[cfg(feature = "email")]
pub use smtp::SmtpNotifier;

#[cfg(feature = "webhook")]
pub use consumer::WebhookConsumer;
#[cfg(feature = "webhook")]
pub use webhook::WebhookSender;
