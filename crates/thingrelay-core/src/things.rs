//! Things service client.
//!
//! Every adapter resolves a thing key through [`ThingsClient`] on each call.
//! Nothing here is cached, so profile changes apply to the next message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::profile::{ProfileConfig, PubConfig};

/// Subject passed to [`ThingsClient::authorize`] for administrative calls.
pub const ROOT_SUBJECT: &str = "root";

/// Which of a thing's keys is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Internal,
    External,
}

impl KeyType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThingKey {
    #[serde(rename = "type", default)]
    pub key_type: KeyType,
    pub value: String,
}

impl ThingKey {
    pub fn internal(value: impl Into<String>) -> Self {
        Self {
            key_type: KeyType::Internal,
            value: value.into(),
        }
    }

    pub fn external(value: impl Into<String>) -> Self {
        Self {
            key_type: KeyType::External,
            value: value.into(),
        }
    }
}

/// Things/Auth service contract.
#[async_trait]
pub trait ThingsClient: Send + Sync {
    /// Resolve a thing key into the publisher id and its profile.
    async fn get_pub_config_by_key(&self, key: &ThingKey) -> Result<PubConfig>;

    /// Profile of a thing addressed by id.
    async fn get_config_by_thing(&self, thing_id: &str) -> Result<ProfileConfig>;

    async fn can_user_access_thing(&self, token: &str, thing_id: &str) -> Result<()>;

    async fn can_user_access_group(&self, token: &str, group_id: &str) -> Result<()>;

    async fn get_group_id_by_thing(&self, thing_id: &str) -> Result<String>;

    async fn get_thing_ids_by_profile(&self, profile_id: &str) -> Result<Vec<String>>;

    /// Check that the token holder may act on `subject` (e.g. [`ROOT_SUBJECT`]).
    async fn authorize(&self, token: &str, subject: &str) -> Result<()>;
}

pub type SharedThings = Arc<dyn ThingsClient>;

/// Thing fixture for [`InMemoryThings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThingRecord {
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub profile_id: String,
    /// Internal key.
    pub key: String,
    #[serde(default)]
    pub external_key: Option<String>,
    #[serde(default)]
    pub profile: ProfileConfig,
}

/// User fixture for [`InMemoryThings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub token: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Root users pass every access check.
    #[serde(default)]
    pub root: bool,
}

#[derive(Default)]
struct Directory {
    things: HashMap<String, ThingRecord>,
    users: HashMap<String, UserRecord>,
}

/// In-process Things service backed by fixtures.
#[derive(Default, Clone)]
pub struct InMemoryThings {
    inner: Arc<RwLock<Directory>>,
}

impl InMemoryThings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(things: Vec<ThingRecord>, users: Vec<UserRecord>) -> Self {
        let directory = Self::new();
        for thing in things {
            directory.add_thing(thing);
        }
        for user in users {
            directory.add_user(user);
        }
        directory
    }

    pub fn add_thing(&self, thing: ThingRecord) {
        self.inner.write().things.insert(thing.id.clone(), thing);
    }

    pub fn add_user(&self, user: UserRecord) {
        self.inner.write().users.insert(user.token.clone(), user);
    }

    /// Register a thing with an internal key and a profile.
    pub fn with_thing(
        self,
        id: impl Into<String>,
        group_id: impl Into<String>,
        key: impl Into<String>,
        profile: ProfileConfig,
    ) -> Self {
        self.add_thing(ThingRecord {
            id: id.into(),
            group_id: group_id.into(),
            key: key.into(),
            profile,
            ..Default::default()
        });
        self
    }

    pub fn with_user(self, token: impl Into<String>, groups: &[&str], root: bool) -> Self {
        self.add_user(UserRecord {
            token: token.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            root,
        });
        self
    }

    /// Replace the profile of an existing thing.
    pub fn set_profile(&self, thing_id: &str, profile: ProfileConfig) -> Result<()> {
        let mut dir = self.inner.write();
        let thing = dir
            .things
            .get_mut(thing_id)
            .ok_or_else(|| Error::NotFound(format!("thing {}", thing_id)))?;
        thing.profile = profile;
        Ok(())
    }

    fn user(&self, token: &str) -> Result<UserRecord> {
        self.inner
            .read()
            .users
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Authentication("unknown user token".to_string()))
    }

    fn thing(&self, thing_id: &str) -> Result<ThingRecord> {
        self.inner
            .read()
            .things
            .get(thing_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("thing {}", thing_id)))
    }
}

#[async_trait]
impl ThingsClient for InMemoryThings {
    async fn get_pub_config_by_key(&self, key: &ThingKey) -> Result<PubConfig> {
        let dir = self.inner.read();
        let thing = dir
            .things
            .values()
            .find(|t| match key.key_type {
                KeyType::Internal => t.key == key.value,
                KeyType::External => t.external_key.as_deref() == Some(key.value.as_str()),
            })
            .ok_or_else(|| Error::Authentication("invalid thing key".to_string()))?;

        Ok(PubConfig::new(thing.id.clone(), Some(thing.profile.clone())))
    }

    async fn get_config_by_thing(&self, thing_id: &str) -> Result<ProfileConfig> {
        Ok(self.thing(thing_id)?.profile)
    }

    async fn can_user_access_thing(&self, token: &str, thing_id: &str) -> Result<()> {
        let user = self.user(token)?;
        let thing = self.thing(thing_id)?;
        if user.root || user.groups.contains(&thing.group_id) {
            Ok(())
        } else {
            Err(Error::Authorization(format!("no access to thing {}", thing_id)))
        }
    }

    async fn can_user_access_group(&self, token: &str, group_id: &str) -> Result<()> {
        let user = self.user(token)?;
        if user.root || user.groups.iter().any(|g| g == group_id) {
            Ok(())
        } else {
            Err(Error::Authorization(format!("no access to group {}", group_id)))
        }
    }

    async fn get_group_id_by_thing(&self, thing_id: &str) -> Result<String> {
        Ok(self.thing(thing_id)?.group_id)
    }

    async fn get_thing_ids_by_profile(&self, profile_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .things
            .values()
            .filter(|t| t.profile_id == profile_id)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn authorize(&self, token: &str, subject: &str) -> Result<()> {
        let user = self.user(token)?;
        if subject == ROOT_SUBJECT && !user.root {
            return Err(Error::Authorization("root access required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::JSON_CONTENT_TYPE;

    fn directory() -> InMemoryThings {
        InMemoryThings::new()
            .with_thing("t1", "g1", "key-1", ProfileConfig::new(JSON_CONTENT_TYPE))
            .with_user("admin", &[], true)
            .with_user("alice", &["g1"], false)
            .with_user("bob", &["g2"], false)
    }

    #[tokio::test]
    async fn test_pub_config_by_key() {
        let things = directory();
        let pc = things
            .get_pub_config_by_key(&ThingKey::internal("key-1"))
            .await
            .unwrap();
        assert_eq!(pc.publisher_id, "t1");
        assert_eq!(
            pc.profile_config.unwrap().content_type,
            JSON_CONTENT_TYPE
        );

        let err = things
            .get_pub_config_by_key(&ThingKey::external("key-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_access_checks() {
        let things = directory();
        assert!(things.can_user_access_thing("alice", "t1").await.is_ok());
        assert!(things.can_user_access_thing("admin", "t1").await.is_ok());
        assert!(matches!(
            things.can_user_access_thing("bob", "t1").await,
            Err(Error::Authorization(_))
        ));
        assert!(things.can_user_access_group("bob", "g2").await.is_ok());
        assert!(things.authorize("admin", ROOT_SUBJECT).await.is_ok());
        assert!(things.authorize("alice", ROOT_SUBJECT).await.is_err());
        assert!(matches!(
            things.authorize("nobody", ROOT_SUBJECT).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_lookup_is_live() {
        let things = directory();
        things
            .set_profile("t1", ProfileConfig::new(JSON_CONTENT_TYPE).with_write(true))
            .unwrap();
        assert!(things.get_config_by_thing("t1").await.unwrap().write);
        assert_eq!(things.get_group_id_by_thing("t1").await.unwrap(), "g1");
    }
}
