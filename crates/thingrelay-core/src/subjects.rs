//! Broker subject derivation.
//!
//! Subjects are dot-delimited. Stored messages go to
//! `<format>.messages[.<subtopic>]`, every message goes to
//! `messages[.<subtopic>]`, and notifications go to the fixed roots
//! `webhook`, `smtp`, `smpp` and `alarm`.

use crate::error::{Error, Result};
use crate::profile::{ContentFormat, ProfileConfig};

/// Root of the all-messages subject.
pub const MESSAGES_SUBJECT: &str = "messages";
/// Webhook forwarding subject.
pub const WEBHOOK_SUBJECT: &str = "webhook";
/// SMTP notification subject.
pub const SMTP_SUBJECT: &str = "smtp";
/// SMPP notification subject.
pub const SMPP_SUBJECT: &str = "smpp";
/// Alarm subject.
pub const ALARM_SUBJECT: &str = "alarm";
/// Prefix of the legacy channel-scoped subjects.
pub const CHANNELS_PREFIX: &str = "channels";

const SINGLE_WILDCARD: char = '*';
const MULTI_WILDCARD: char = '>';

/// Normalise a slash- or dot-delimited, URL-escaped path into a subject.
///
/// Empty segments are dropped. A segment that is exactly `*` or `>` is kept;
/// a longer segment containing either character is rejected.
pub fn create_subject(topic: &str) -> Result<String> {
    let topic = query_unescape(topic)?;

    let mut segments = Vec::new();
    for segment in topic.split(['/', '.']) {
        if segment.is_empty() {
            continue;
        }
        if segment.len() > 1 && segment.contains([SINGLE_WILDCARD, MULTI_WILDCARD]) {
            return Err(Error::MalformedSubtopic);
        }
        segments.push(segment);
    }

    Ok(segments.join("."))
}

/// Subjects a message with this profile and subtopic is published to.
///
/// The all-messages subject is always first. The format-qualified storage
/// subject follows when the profile has writing enabled and a known format.
pub fn get_subjects(profile: Option<&ProfileConfig>, subtopic: &str) -> Vec<String> {
    let mut subjects = vec![messages_subject(subtopic)];

    if let Some(profile) = profile {
        if profile.write {
            match profile.format() {
                Ok(format) => subjects.push(format_subject(format, subtopic)),
                Err(e) => tracing::warn!(error = %e, "Skipping storage subject"),
            }
        }
    }

    subjects
}

/// Fixed notification subjects enabled by the profile.
pub fn notification_subjects(profile: Option<&ProfileConfig>) -> Vec<String> {
    let Some(profile) = profile else {
        return Vec::new();
    };

    let mut subjects = Vec::new();
    if profile.webhook {
        subjects.push(WEBHOOK_SUBJECT.to_string());
    }
    if profile.smtp_id.as_deref().is_some_and(|id| !id.is_empty()) {
        subjects.push(SMTP_SUBJECT.to_string());
    }
    if profile.smpp_id.as_deref().is_some_and(|id| !id.is_empty()) {
        subjects.push(SMPP_SUBJECT.to_string());
    }
    subjects
}

/// `messages[.<subtopic>]`.
pub fn messages_subject(subtopic: &str) -> String {
    with_subtopic(MESSAGES_SUBJECT.to_string(), subtopic)
}

/// `<format>.messages[.<subtopic>]`.
pub fn format_subject(format: ContentFormat, subtopic: &str) -> String {
    with_subtopic(format!("{}.{}", format.as_str(), MESSAGES_SUBJECT), subtopic)
}

/// Legacy `channels.<channel_id>.<format>.messages[.<subtopic>]`.
pub fn channel_subject(channel_id: &str, format: ContentFormat, subtopic: &str) -> String {
    with_subtopic(
        format!(
            "{}.{}.{}.{}",
            CHANNELS_PREFIX,
            channel_id,
            format.as_str(),
            MESSAGES_SUBJECT
        ),
        subtopic,
    )
}

/// Subject an adapter subscribes to for a raw transport subtopic.
pub fn subscription_subject(subtopic: &str) -> Result<String> {
    let subtopic = create_subject(subtopic)?;
    Ok(messages_subject(&subtopic))
}

/// NATS-style match: `*` matches one token, a trailing `>` one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn with_subtopic(mut subject: String, subtopic: &str) -> String {
    if !subtopic.is_empty() {
        subject.push('.');
        subject.push_str(subtopic);
    }
    subject
}

/// Query-string unescape: `+` is a space and every `%` must start a valid escape.
fn query_unescape(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(Error::MalformedSubtopic);
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::MalformedSubtopic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{JSON_CONTENT_TYPE, SENML_CONTENT_TYPE};

    #[test]
    fn test_create_subject_normalises_paths() {
        assert_eq!(create_subject("a/b/c").unwrap(), "a.b.c");
        assert_eq!(create_subject("/a//b/").unwrap(), "a.b");
        assert_eq!(create_subject("a.b/c").unwrap(), "a.b.c");
        assert_eq!(create_subject("").unwrap(), "");
        assert_eq!(create_subject("room%2F1").unwrap(), "room.1");
        assert_eq!(create_subject("floor+1").unwrap(), "floor 1");
    }

    #[test]
    fn test_create_subject_wildcards() {
        assert_eq!(create_subject("a/*/c").unwrap(), "a.*.c");
        assert_eq!(create_subject("a/>").unwrap(), "a.>");
        assert_eq!(create_subject("*").unwrap(), "*");
        assert!(matches!(create_subject("a/b*"), Err(Error::MalformedSubtopic)));
        assert!(matches!(create_subject("foo>bar"), Err(Error::MalformedSubtopic)));
        assert!(matches!(create_subject("a/**"), Err(Error::MalformedSubtopic)));
        assert!(matches!(create_subject("a%2Fb%2A"), Err(Error::MalformedSubtopic)));
    }

    #[test]
    fn test_create_subject_bad_escape() {
        assert!(matches!(create_subject("a/%zz"), Err(Error::MalformedSubtopic)));
        assert!(matches!(create_subject("a/%2"), Err(Error::MalformedSubtopic)));
        assert!(matches!(create_subject("%ff%fe"), Err(Error::MalformedSubtopic)));
    }

    #[test]
    fn test_get_subjects() {
        assert_eq!(get_subjects(None, ""), vec!["messages"]);

        let senml = ProfileConfig::new(SENML_CONTENT_TYPE).with_write(true);
        assert_eq!(
            get_subjects(Some(&senml), "room.1"),
            vec!["messages.room.1", "senml.messages.room.1"]
        );

        let json = ProfileConfig::new(JSON_CONTENT_TYPE).with_write(true);
        assert_eq!(
            get_subjects(Some(&json), ""),
            vec!["messages", "json.messages"]
        );

        let no_write = ProfileConfig::new(JSON_CONTENT_TYPE);
        assert_eq!(get_subjects(Some(&no_write), "x"), vec!["messages.x"]);

        let unknown = ProfileConfig::new("text/csv").with_write(true);
        assert_eq!(get_subjects(Some(&unknown), ""), vec!["messages"]);
    }

    #[test]
    fn test_notification_subjects() {
        assert!(notification_subjects(None).is_empty());
        let profile = ProfileConfig::new(JSON_CONTENT_TYPE)
            .with_webhook(true)
            .with_smtp("n1")
            .with_smpp("");
        assert_eq!(notification_subjects(Some(&profile)), vec!["webhook", "smtp"]);
    }

    #[test]
    fn test_channel_subject() {
        assert_eq!(
            channel_subject("ch1", ContentFormat::Json, "a.b"),
            "channels.ch1.json.messages.a.b"
        );
    }

    #[test]
    fn test_subscription_subject() {
        assert_eq!(subscription_subject("").unwrap(), "messages");
        assert_eq!(subscription_subject("/a/b").unwrap(), "messages.a.b");
        assert_eq!(subscription_subject("a/>").unwrap(), "messages.a.>");
        assert!(subscription_subject("a*").is_err());
    }

    #[test]
    fn test_subject_matches() {
        assert!(subject_matches("messages", "messages"));
        assert!(subject_matches("messages.>", "messages.a.b"));
        assert!(!subject_matches("messages.>", "messages"));
        assert!(subject_matches("messages.*", "messages.a"));
        assert!(!subject_matches("messages.*", "messages.a.b"));
        assert!(subject_matches("*.messages", "json.messages"));
        assert!(!subject_matches("smtp", "smtp.n1"));
        assert!(subject_matches(">", "anything.at.all"));
    }
}
