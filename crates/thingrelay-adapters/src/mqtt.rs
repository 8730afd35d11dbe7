//! MQTT adapter service.
//!
//! Driven by an MQTT broker's client hooks: connect authentication, publish
//! and subscription tracking. Topics are `messages[/<subtopic>]`; the MQTT
//! wildcards `+` and `#` become the subject wildcards `*` and `>`.
//!
//! Subscriptions are recorded as `(subtopic, group, thing)` rows so operators
//! can list who listens on what in a group.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use thingrelay_core::message::PROTOCOL_MQTT;
use thingrelay_core::subjects::{create_subject, MESSAGES_SUBJECT};
use thingrelay_core::{Error, Message, PubConfig, Result, SharedThings, ThingKey};
use thingrelay_messaging::Publisher;
use thingrelay_storage::{Collection, SharedBackend};

const SUBSCRIPTIONS_TABLE: &str = "mqtt_subscriptions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subtopic: String,
    pub group_id: String,
    pub thing_id: String,
    #[serde(default)]
    pub client_id: String,
}

impl Subscription {
    fn key(&self) -> String {
        subscription_key(&self.group_id, &self.thing_id, &self.subtopic)
    }
}

fn subscription_key(group_id: &str, thing_id: &str, subtopic: &str) -> String {
    format!("{}:{}:{}", group_id, thing_id, subtopic)
}

pub struct SubscriptionRepository {
    records: Collection<Subscription>,
}

impl SubscriptionRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            records: Collection::new(backend, SUBSCRIPTIONS_TABLE),
        }
    }

    pub fn save(&self, subscription: &Subscription) -> Result<()> {
        Ok(self.records.put(&subscription.key(), subscription)?)
    }

    pub fn remove(&self, group_id: &str, thing_id: &str, subtopic: &str) -> Result<bool> {
        Ok(self
            .records
            .remove(&subscription_key(group_id, thing_id, subtopic))?)
    }

    /// Drop every row of one thing, returning how many were removed.
    pub fn remove_by_thing(&self, group_id: &str, thing_id: &str) -> Result<usize> {
        let prefix = format!("{}:{}:", group_id, thing_id);
        let mut removed = 0;
        for (key, _) in self.records.scan(&prefix)? {
            if self.records.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn list_by_group(&self, group_id: &str) -> Result<Vec<Subscription>> {
        Ok(self.records.values(&format!("{}:", group_id))?)
    }
}

pub struct MqttService {
    things: SharedThings,
    publisher: Arc<dyn Publisher>,
    subscriptions: SubscriptionRepository,
}

impl MqttService {
    pub fn new(
        things: SharedThings,
        publisher: Arc<dyn Publisher>,
        subscriptions: SubscriptionRepository,
    ) -> Self {
        Self {
            things,
            publisher,
            subscriptions,
        }
    }

    /// Authenticate a connecting client by its thing key.
    pub async fn connect(&self, key: &ThingKey, client_id: &str) -> Result<PubConfig> {
        let pub_config = crate::ingress::resolve(self.things.as_ref(), key).await?;
        info!(client_id, thing_id = %pub_config.publisher_id, "MQTT client connected");
        Ok(pub_config)
    }

    pub async fn publish(&self, key: &ThingKey, topic: &str, payload: Vec<u8>) -> Result<Message> {
        let subtopic = parse_topic(topic)?;
        crate::ingress::publish(
            self.things.as_ref(),
            self.publisher.as_ref(),
            key,
            PROTOCOL_MQTT,
            &subtopic,
            payload,
        )
        .await
    }

    /// Record the client's subscriptions. All topics are validated first.
    pub async fn subscribe(&self, key: &ThingKey, client_id: &str, topics: &[String]) -> Result<()> {
        let subtopics = parse_topics(topics)?;
        let (thing_id, group_id) = self.identify(key).await?;

        for subtopic in subtopics {
            debug!(thing_id = %thing_id, subtopic = %subtopic, "Recording MQTT subscription");
            self.subscriptions.save(&Subscription {
                subtopic,
                group_id: group_id.clone(),
                thing_id: thing_id.clone(),
                client_id: client_id.to_string(),
            })?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, key: &ThingKey, topics: &[String]) -> Result<()> {
        let subtopics = parse_topics(topics)?;
        let (thing_id, group_id) = self.identify(key).await?;

        for subtopic in subtopics {
            self.subscriptions.remove(&group_id, &thing_id, &subtopic)?;
        }
        Ok(())
    }

    /// Forget everything a disconnecting client subscribed to.
    pub async fn disconnect(&self, key: &ThingKey) -> Result<()> {
        let (thing_id, group_id) = self.identify(key).await?;
        let removed = self.subscriptions.remove_by_thing(&group_id, &thing_id)?;
        info!(thing_id = %thing_id, removed, "MQTT client disconnected");
        Ok(())
    }

    /// Subscriptions in a group, for a user allowed to see that group.
    pub async fn list_subscriptions(&self, token: &str, group_id: &str) -> Result<Vec<Subscription>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.subscriptions.list_by_group(group_id)
    }

    async fn identify(&self, key: &ThingKey) -> Result<(String, String)> {
        let pub_config = crate::ingress::resolve(self.things.as_ref(), key).await?;
        let group_id = self
            .things
            .get_group_id_by_thing(&pub_config.publisher_id)
            .await
            .map_err(Error::authorization)?;
        Ok((pub_config.publisher_id, group_id))
    }
}

/// `messages/a/+/#` becomes the subtopic `a.*.>`.
pub fn parse_topic(topic: &str) -> Result<String> {
    let topic = topic.trim_start_matches('/');
    let rest = topic
        .strip_prefix(MESSAGES_SUBJECT)
        .ok_or(Error::MalformedSubtopic)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return Err(Error::MalformedSubtopic);
    }

    let translated: Vec<&str> = rest
        .split('/')
        .map(|segment| match segment {
            "+" => "*",
            "#" => ">",
            other => other,
        })
        .collect();
    create_subject(&translated.join("/"))
}

fn parse_topics(topics: &[String]) -> Result<Vec<String>> {
    topics.iter().map(|t| parse_topic(t)).collect()
}
