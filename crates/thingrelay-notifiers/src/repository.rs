//! Notifier and webhook persistence.

use thingrelay_core::Result;
use thingrelay_storage::{Collection, SharedBackend};

use crate::model::{NotifierConfig, Webhook};

pub const SMTP_NOTIFIERS_TABLE: &str = "smtp_notifiers";
pub const SMPP_NOTIFIERS_TABLE: &str = "smpp_notifiers";
const WEBHOOKS_TABLE: &str = "webhooks";

#[derive(Clone)]
pub struct NotifierRepository {
    notifiers: Collection<NotifierConfig>,
}

impl NotifierRepository {
    pub fn new(backend: SharedBackend, table: &'static str) -> Self {
        Self {
            notifiers: Collection::new(backend, table),
        }
    }

    pub fn smtp(backend: SharedBackend) -> Self {
        Self::new(backend, SMTP_NOTIFIERS_TABLE)
    }

    pub fn smpp(backend: SharedBackend) -> Self {
        Self::new(backend, SMPP_NOTIFIERS_TABLE)
    }

    pub fn save(&self, notifiers: &[NotifierConfig]) -> Result<()> {
        Ok(self
            .notifiers
            .put_batch(notifiers.iter().map(|n| (n.id.clone(), n)))?)
    }

    pub fn retrieve(&self, id: &str) -> Result<NotifierConfig> {
        Ok(self.notifiers.require(id)?)
    }

    pub fn retrieve_by_group(&self, group_id: &str) -> Result<Vec<NotifierConfig>> {
        Ok(self
            .notifiers
            .all()?
            .into_iter()
            .filter(|n| n.group_id == group_id)
            .collect())
    }

    pub fn remove(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.notifiers.remove(id)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WebhookRepository {
    webhooks: Collection<Webhook>,
}

impl WebhookRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            webhooks: Collection::new(backend, WEBHOOKS_TABLE),
        }
    }

    pub fn save(&self, webhooks: &[Webhook]) -> Result<()> {
        Ok(self
            .webhooks
            .put_batch(webhooks.iter().map(|w| (w.id.clone(), w)))?)
    }

    pub fn retrieve(&self, id: &str) -> Result<Webhook> {
        Ok(self.webhooks.require(id)?)
    }

    pub fn retrieve_by_thing(&self, thing_id: &str) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .all()?
            .into_iter()
            .filter(|w| w.thing_id == thing_id)
            .collect())
    }

    pub fn retrieve_by_group(&self, group_id: &str) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .all()?
            .into_iter()
            .filter(|w| w.group_id == group_id)
            .collect())
    }

    pub fn remove(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.webhooks.remove(id)?;
        }
        Ok(())
    }
}
