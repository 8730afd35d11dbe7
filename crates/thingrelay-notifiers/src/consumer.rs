//! Notification consumers.
//!
//! [`NotifierConsumer`] serves one notifier kind on the `smtp` or `smpp`
//! subject. A rule action names its notifier in the envelope target; any
//! other delivery uses the notifier id from the sender's profile.
//! [`WebhookConsumer`] forwards `webhook` deliveries to every webhook of the
//! publishing thing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use thingrelay_core::subjects::{SMPP_SUBJECT, SMTP_SUBJECT};
use thingrelay_core::{Message, Result};
use thingrelay_messaging::{MessageHandler, Subscriber};

use crate::model::Notification;
use crate::notifier::SharedNotifier;
use crate::repository::NotifierRepository;

pub struct NotifierConsumer {
    root: &'static str,
    notifier: SharedNotifier,
    repo: NotifierRepository,
}

impl NotifierConsumer {
    /// Consumer for `root`, which is [`SMTP_SUBJECT`] or [`SMPP_SUBJECT`].
    pub fn new(root: &'static str, notifier: SharedNotifier, repo: NotifierRepository) -> Self {
        Self { root, notifier, repo }
    }

    pub fn consumer_id(&self) -> String {
        format!("{}-notifier", self.root)
    }

    pub async fn start<S: Subscriber + ?Sized>(self: Arc<Self>, subscriber: &S) -> Result<()> {
        let id = self.consumer_id();
        subscriber.subscribe(&id, self.root, self).await
    }

    fn notifier_id(&self, msg: &Message) -> Option<String> {
        if !msg.target.is_empty() {
            return Some(msg.target.clone());
        }
        let profile = msg.profile.as_ref()?;
        let id = match self.root {
            SMTP_SUBJECT => profile.smtp_id.as_ref(),
            SMPP_SUBJECT => profile.smpp_id.as_ref(),
            _ => None,
        };
        id.filter(|id| !id.is_empty()).cloned()
    }
}

#[async_trait]
impl MessageHandler for NotifierConsumer {
    async fn handle(&self, msg: Message) -> Result<()> {
        let Some(notifier_id) = self.notifier_id(&msg) else {
            warn!(subject = %msg.subject, thing_id = %msg.publisher, "No notifier for delivery");
            return Ok(());
        };

        let target = match self.repo.retrieve(&notifier_id) {
            Ok(target) => target,
            Err(e) => {
                warn!(notifier_id = %notifier_id, error = %e, "Unknown notifier");
                return Ok(());
            }
        };

        let notification = Notification::from_message(&msg);
        match self.notifier.notify(&target.contacts, &notification).await {
            Ok(()) => debug!(kind = self.notifier.kind(), notifier_id = %notifier_id, "Notification sent"),
            Err(e) => warn!(
                kind = self.notifier.kind(),
                notifier_id = %notifier_id,
                thing_id = %msg.publisher,
                error = %e,
                "Notification failed"
            ),
        }
        Ok(())
    }
}

#[cfg(feature = "webhook")]
pub use webhooks::WebhookConsumer;

#[cfg(feature = "webhook")]
mod webhooks {
    use super::*;

    use thingrelay_core::subjects::WEBHOOK_SUBJECT;

    use crate::repository::WebhookRepository;
    use crate::webhook::{webhook_body, WebhookSender};

    /// Subscriber id the webhook consumer registers under.
    pub const WEBHOOK_CONSUMER_ID: &str = "webhook-notifier";

    pub struct WebhookConsumer {
        repo: WebhookRepository,
        sender: WebhookSender,
    }

    impl WebhookConsumer {
        pub fn new(repo: WebhookRepository, sender: WebhookSender) -> Self {
            Self { repo, sender }
        }

        pub async fn start<S: Subscriber + ?Sized>(self: Arc<Self>, subscriber: &S) -> Result<()> {
            subscriber
                .subscribe(WEBHOOK_CONSUMER_ID, WEBHOOK_SUBJECT, self)
                .await
        }
    }

    #[async_trait]
    impl MessageHandler for WebhookConsumer {
        async fn handle(&self, msg: Message) -> Result<()> {
            let hooks = self.repo.retrieve_by_thing(&msg.publisher)?;
            if hooks.is_empty() {
                debug!(thing_id = %msg.publisher, "Thing has no webhooks");
                return Ok(());
            }

            let body = match webhook_body(&msg) {
                Ok(body) => body,
                Err(e) => {
                    warn!(thing_id = %msg.publisher, error = %e, "Skipping webhook delivery");
                    return Ok(());
                }
            };

            for hook in &hooks {
                if let Err(e) = self.sender.send(hook, &body).await {
                    warn!(webhook_id = %hook.id, url = %hook.url, error = %e, "Webhook delivery failed");
                }
            }
            Ok(())
        }
    }
}
