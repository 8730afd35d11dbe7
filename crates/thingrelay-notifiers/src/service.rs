//! Notifier and webhook management.
//!
//! Notifiers belong to a group; webhooks belong to a thing and inherit its
//! group. Contacts are checked by the notifier that will use them.

use tracing::info;

use thingrelay_core::{Result, SharedThings};

use crate::model::{NotifierConfig, Webhook};
use crate::notifier::SharedNotifier;
use crate::repository::{NotifierRepository, WebhookRepository};

pub struct NotifiersService {
    things: SharedThings,
    repo: NotifierRepository,
    notifier: SharedNotifier,
}

impl NotifiersService {
    pub fn new(things: SharedThings, repo: NotifierRepository, notifier: SharedNotifier) -> Self {
        Self {
            things,
            repo,
            notifier,
        }
    }

    pub async fn create_notifiers(
        &self,
        token: &str,
        group_id: &str,
        notifiers: Vec<NotifierConfig>,
    ) -> Result<Vec<NotifierConfig>> {
        self.things.can_user_access_group(token, group_id).await?;

        let mut created = Vec::with_capacity(notifiers.len());
        for mut notifier in notifiers {
            self.notifier.validate_contacts(&notifier.contacts)?;
            notifier.id = uuid::Uuid::new_v4().to_string();
            notifier.group_id = group_id.to_string();
            created.push(notifier);
        }

        self.repo.save(&created)?;
        info!(kind = self.notifier.kind(), group_id, count = created.len(), "Notifiers created");
        Ok(created)
    }

    pub async fn list_notifiers_by_group(&self, token: &str, group_id: &str) -> Result<Vec<NotifierConfig>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.repo.retrieve_by_group(group_id)
    }

    pub async fn view_notifier(&self, token: &str, id: &str) -> Result<NotifierConfig> {
        let notifier = self.repo.retrieve(id)?;
        self.things.can_user_access_group(token, &notifier.group_id).await?;
        Ok(notifier)
    }

    pub async fn update_notifier(&self, token: &str, mut notifier: NotifierConfig) -> Result<NotifierConfig> {
        let current = self.view_notifier(token, &notifier.id).await?;
        self.notifier.validate_contacts(&notifier.contacts)?;
        notifier.group_id = current.group_id;
        self.repo.save(std::slice::from_ref(&notifier))?;
        Ok(notifier)
    }

    pub async fn remove_notifiers(&self, token: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            self.view_notifier(token, id).await?;
        }
        self.repo.remove(ids)
    }
}

pub struct WebhooksService {
    things: SharedThings,
    repo: WebhookRepository,
}

impl WebhooksService {
    pub fn new(things: SharedThings, repo: WebhookRepository) -> Self {
        Self { things, repo }
    }

    pub async fn create_webhooks(&self, token: &str, thing_id: &str, webhooks: Vec<Webhook>) -> Result<Vec<Webhook>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        let group_id = self.things.get_group_id_by_thing(thing_id).await?;

        let mut created = Vec::with_capacity(webhooks.len());
        for mut webhook in webhooks {
            webhook.validate()?;
            webhook.id = uuid::Uuid::new_v4().to_string();
            webhook.thing_id = thing_id.to_string();
            webhook.group_id = group_id.clone();
            created.push(webhook);
        }

        self.repo.save(&created)?;
        info!(thing_id, count = created.len(), "Webhooks created");
        Ok(created)
    }

    pub async fn list_webhooks_by_thing(&self, token: &str, thing_id: &str) -> Result<Vec<Webhook>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        self.repo.retrieve_by_thing(thing_id)
    }

    pub async fn list_webhooks_by_group(&self, token: &str, group_id: &str) -> Result<Vec<Webhook>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.repo.retrieve_by_group(group_id)
    }

    pub async fn view_webhook(&self, token: &str, id: &str) -> Result<Webhook> {
        let webhook = self.repo.retrieve(id)?;
        self.things.can_user_access_thing(token, &webhook.thing_id).await?;
        Ok(webhook)
    }

    pub async fn update_webhook(&self, token: &str, mut webhook: Webhook) -> Result<Webhook> {
        let current = self.view_webhook(token, &webhook.id).await?;
        webhook.validate()?;
        webhook.thing_id = current.thing_id;
        webhook.group_id = current.group_id;
        self.repo.save(std::slice::from_ref(&webhook))?;
        Ok(webhook)
    }

    pub async fn remove_webhooks(&self, token: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            self.view_webhook(token, id).await?;
        }
        self.repo.remove(ids)
    }
}
