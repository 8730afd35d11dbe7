//! End-to-end check of the envelope path: key lookup, formatting, routing.

use thingrelay_core::message::PROTOCOL_MQTT;
use thingrelay_core::profile::{SENML_CONTENT_TYPE, JSON_CONTENT_TYPE};
use thingrelay_core::subjects::{create_subject, get_subjects, notification_subjects};
use thingrelay_core::{
    format_message, Condition, InMemoryThings, Message, ProfileConfig, Rule, ThingKey,
    ThingsClient,
};

#[tokio::test]
async fn test_lookup_format_and_route() {
    let profile = ProfileConfig::new(JSON_CONTENT_TYPE)
        .with_write(true)
        .with_webhook(true)
        .with_smtp("mail-1")
        .with_rule(Rule::new("r1", "hot", Condition::new("temperature", ">", 30.0)));
    let things = InMemoryThings::new().with_thing("thing-1", "g1", "secret", profile);

    let pub_config = things
        .get_pub_config_by_key(&ThingKey::internal("secret"))
        .await
        .unwrap();

    let subtopic = create_subject("/building%201/floor/2").unwrap();
    let mut msg = Message::new(PROTOCOL_MQTT, subtopic, br#"{"temperature":35}"#.to_vec());
    format_message(&pub_config, &mut msg);

    assert_eq!(msg.publisher, "thing-1");
    assert_eq!(msg.subtopic, "building 1.floor.2");
    assert_eq!(msg.rules().len(), 1);

    let subjects = get_subjects(msg.profile.as_ref(), &msg.subtopic);
    assert_eq!(
        subjects,
        vec![
            "messages.building 1.floor.2".to_string(),
            "json.messages.building 1.floor.2".to_string(),
        ]
    );
    assert_eq!(
        notification_subjects(msg.profile.as_ref()),
        vec!["webhook".to_string(), "smtp".to_string()]
    );
}

#[tokio::test]
async fn test_unknown_key_is_rejected() {
    let things = InMemoryThings::new().with_thing(
        "thing-1",
        "g1",
        "secret",
        ProfileConfig::new(SENML_CONTENT_TYPE),
    );
    assert!(things
        .get_pub_config_by_key(&ThingKey::internal("wrong"))
        .await
        .is_err());
}
