//! Alarms raised by rule actions.
//!
//! [`AlarmConsumer`] listens on `alarm` and stores one [`Alarm`] per
//! delivery. The raising rule is the envelope's target.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use thingrelay_core::subjects::ALARM_SUBJECT;
use thingrelay_core::{Message, Result, SharedThings};
use thingrelay_messaging::{MessageHandler, Subscriber};
use thingrelay_storage::{Collection, SharedBackend};

const ALARMS_TABLE: &str = "alarms";

/// Subscriber id the alarm consumer registers under.
pub const ALARM_CONSUMER_ID: &str = "alarms";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub thing_id: String,
    pub group_id: String,
    /// Empty when raised without a rule.
    #[serde(default)]
    pub rule_id: String,
    pub subtopic: String,
    pub protocol: String,
    /// Triggering record; non-JSON payloads are stored as a string.
    pub payload: Value,
    pub created: i64,
}

impl Alarm {
    fn key(&self) -> String {
        format!("{}:{:020}:{}", self.thing_id, self.created, self.id)
    }

    /// Build an alarm from a delivery on an alarm subject.
    pub fn from_message(msg: &Message, group_id: impl Into<String>) -> Self {
        let payload = serde_json::from_slice(&msg.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&msg.payload).into_owned()));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thing_id: msg.publisher.clone(),
            group_id: group_id.into(),
            rule_id: msg.target.clone(),
            subtopic: msg.subtopic.clone(),
            protocol: msg.protocol.clone(),
            payload,
            created: msg.created,
        }
    }
}

#[derive(Clone)]
pub struct AlarmRepository {
    alarms: Collection<Alarm>,
}

impl AlarmRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            alarms: Collection::new(backend, ALARMS_TABLE),
        }
    }

    pub fn save(&self, alarm: &Alarm) -> Result<()> {
        Ok(self.alarms.put(&alarm.key(), alarm)?)
    }

    /// Alarms of one thing, oldest first.
    pub fn retrieve_by_thing(&self, thing_id: &str) -> Result<Vec<Alarm>> {
        Ok(self.alarms.values(&format!("{}:", thing_id))?)
    }

    pub fn retrieve_by_group(&self, group_id: &str) -> Result<Vec<Alarm>> {
        Ok(self
            .alarms
            .all()?
            .into_iter()
            .filter(|a| a.group_id == group_id)
            .collect())
    }

    pub fn retrieve(&self, id: &str) -> Result<Option<Alarm>> {
        Ok(self.alarms.all()?.into_iter().find(|a| a.id == id))
    }

    pub fn remove(&self, alarm: &Alarm) -> Result<bool> {
        Ok(self.alarms.remove(&alarm.key())?)
    }
}

pub struct AlarmService {
    things: SharedThings,
    repo: AlarmRepository,
}

impl AlarmService {
    pub fn new(things: SharedThings, repo: AlarmRepository) -> Self {
        Self { things, repo }
    }

    pub async fn list_alarms_by_thing(&self, token: &str, thing_id: &str) -> Result<Vec<Alarm>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        self.repo.retrieve_by_thing(thing_id)
    }

    pub async fn list_alarms_by_group(&self, token: &str, group_id: &str) -> Result<Vec<Alarm>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.repo.retrieve_by_group(group_id)
    }

    pub async fn remove_alarms(&self, token: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            let alarm = self
                .repo
                .retrieve(id)?
                .ok_or_else(|| thingrelay_core::Error::NotFound(format!("alarm {}", id)))?;
            self.things.can_user_access_group(token, &alarm.group_id).await?;
            self.repo.remove(&alarm)?;
        }
        Ok(())
    }
}

pub struct AlarmConsumer {
    things: SharedThings,
    repo: AlarmRepository,
}

impl AlarmConsumer {
    pub fn new(things: SharedThings, repo: AlarmRepository) -> Self {
        Self { things, repo }
    }

    pub async fn start<S: Subscriber + ?Sized>(self: Arc<Self>, subscriber: &S) -> Result<()> {
        subscriber
            .subscribe(ALARM_CONSUMER_ID, ALARM_SUBJECT, self)
            .await
    }
}

#[async_trait]
impl MessageHandler for AlarmConsumer {
    async fn handle(&self, msg: Message) -> Result<()> {
        let group_id = match self.things.get_group_id_by_thing(&msg.publisher).await {
            Ok(group_id) => group_id,
            Err(e) => {
                warn!(thing_id = %msg.publisher, error = %e, "Dropping alarm for unknown thing");
                return Ok(());
            }
        };

        let alarm = Alarm::from_message(&msg, group_id);
        self.repo.save(&alarm)?;
        debug!(alarm_id = %alarm.id, rule_id = %alarm.rule_id, "Alarm stored");
        Ok(())
    }
}
