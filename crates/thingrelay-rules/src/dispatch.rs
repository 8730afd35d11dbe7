//! Action dispatch for triggered rules.
//!
//! Rule actions publish copies of the triggering envelope to the fixed
//! `alarm`, `smtp`, `smpp` or `webhook` subjects. The rule id (alarms) or
//! notifier id (smtp, smpp) travels in [`Message::target`]. Consumers
//! dispatch as detached tasks; [`DispatchStats`] is the hook for seeing what
//! those tasks did.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thingrelay_core::rule::{ACTION_TYPE_ALARM, ACTION_TYPE_SMPP, ACTION_TYPE_SMTP, ACTION_TYPE_WEBHOOK};
use thingrelay_core::subjects::{ALARM_SUBJECT, SMPP_SUBJECT, SMTP_SUBJECT, WEBHOOK_SUBJECT};
use thingrelay_core::{Action, Error, Message, Result, Rule};
use thingrelay_messaging::Publisher;

/// Counters for detached dispatches.
#[derive(Debug, Default)]
pub struct DispatchStats {
    published: AtomicU64,
    failed: AtomicU64,
    evaluation_errors: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub published: u64,
    pub failed: u64,
    pub evaluation_errors: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evaluation_errors: self.evaluation_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_evaluation_error(&self) {
        self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Where one action delivers: a fixed subject plus the envelope target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRoute {
    pub subject: &'static str,
    pub target: String,
}

/// Route for an action of `rule`.
pub fn action_route(rule: &Rule, action: &Action) -> Result<ActionRoute> {
    let (subject, target) = match action.action_type.as_str() {
        ACTION_TYPE_ALARM => (ALARM_SUBJECT, rule.id.clone()),
        ACTION_TYPE_WEBHOOK => (WEBHOOK_SUBJECT, String::new()),
        ACTION_TYPE_SMTP | ACTION_TYPE_SMPP if action.id.is_empty() => {
            return Err(Error::InvalidActionId)
        }
        ACTION_TYPE_SMTP => (SMTP_SUBJECT, action.id.clone()),
        ACTION_TYPE_SMPP => (SMPP_SUBJECT, action.id.clone()),
        other => return Err(Error::InvalidActionType(other.to_string())),
    };
    Ok(ActionRoute { subject, target })
}

/// Publish every triggering payload to every action subject of the rule.
///
/// All action routes are resolved before anything is published, so a
/// misconfigured action publishes nothing. Returns the number of publishes.
pub async fn dispatch_actions<P: Publisher + ?Sized>(
    publisher: &P,
    msg: &Message,
    rule: &Rule,
    triggered: &[Vec<u8>],
) -> Result<usize> {
    let routes = rule
        .actions
        .iter()
        .map(|action| action_route(rule, action))
        .collect::<Result<Vec<_>>>()?;

    let mut published = 0;
    for payload in triggered {
        let copy = msg.with_payload(payload.clone());
        for route in &routes {
            publisher
                .publish_to(route.subject, &copy.with_target(route.target.as_str()))
                .await?;
            published += 1;
        }
    }
    Ok(published)
}

/// Run [`dispatch_actions`] as a detached task.
pub fn spawn_dispatch(
    publisher: Arc<dyn Publisher>,
    msg: Message,
    rule: Rule,
    triggered: Vec<Vec<u8>>,
    stats: Arc<DispatchStats>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match dispatch_actions(publisher.as_ref(), &msg, &rule, &triggered).await {
            Ok(count) => {
                stats.published.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    rule_id = %rule.id,
                    publisher = %msg.publisher,
                    error = %e,
                    "Rule action dispatch failed"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use thingrelay_core::Condition;
    use thingrelay_messaging::{ChannelHandler, MemoryBroker, PubSub, Subscriber};

    fn rule() -> Rule {
        Rule::new("r1", "hot", Condition::new("t", ">", 30.0))
    }

    fn route(subject: &'static str, target: &str) -> ActionRoute {
        ActionRoute {
            subject,
            target: target.to_string(),
        }
    }

    #[test]
    fn test_action_routes() {
        let r = rule();
        assert_eq!(action_route(&r, &Action::alarm()).unwrap(), route("alarm", "r1"));
        assert_eq!(action_route(&r, &Action::new("smtp", "n1")).unwrap(), route("smtp", "n1"));
        assert_eq!(action_route(&r, &Action::new("smpp", "n2")).unwrap(), route("smpp", "n2"));
        assert_eq!(action_route(&r, &Action::new("webhook", "")).unwrap(), route("webhook", ""));
        assert!(matches!(
            action_route(&r, &Action::new("smtp", "")),
            Err(Error::InvalidActionId)
        ));
        assert!(matches!(
            action_route(&r, &Action::new("fax", "1")),
            Err(Error::InvalidActionType(_))
        ));
    }

    #[tokio::test]
    async fn test_alarm_reaches_exact_alarm_subscriber() {
        let ps = PubSub::new(MemoryBroker::new());
        let (alarms, mut rx) = ChannelHandler::new(8);
        ps.subscribe("external", "alarm", alarms).await.unwrap();

        let r = rule().with_action(Action::alarm());
        let msg = Message::new("http", "", br#"{"t":35}"#.to_vec());
        let count = dispatch_actions(&ps, &msg, &r, &[br#"{"t":35}"#.to_vec()])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.subject, "alarm");
        assert_eq!(delivered.target, "r1");
    }

    #[tokio::test]
    async fn test_dispatch_publishes_each_record() {
        let ps = PubSub::new(MemoryBroker::new());
        let (tap, mut rx) = ChannelHandler::new(8);
        ps.subscribe("tap", ">", tap).await.unwrap();

        let r = rule().with_action(Action::alarm()).with_action(Action::new("smtp", "n1"));
        let msg = Message::new("http", "", br#"[{"t":31},{"t":32}]"#.to_vec());
        let triggered = vec![br#"{"t":31}"#.to_vec(), br#"{"t":32}"#.to_vec()];

        let count = dispatch_actions(&ps, &msg, &r, &triggered).await.unwrap();
        assert_eq!(count, 4);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.subject, "alarm");
        assert_eq!(first.target, "r1");
        assert_eq!(first.payload, br#"{"t":31}"#);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.subject, "smtp");
        assert_eq!(second.target, "n1");
    }

    #[tokio::test]
    async fn test_bad_action_publishes_nothing() {
        let ps = PubSub::new(MemoryBroker::new());
        let r = rule().with_action(Action::alarm()).with_action(Action::new("smpp", ""));
        let msg = Message::new("http", "", b"{}".to_vec());

        let err = dispatch_actions(&ps, &msg, &r, &[b"{}".to_vec()]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidActionId));
        assert_eq!(ps.broker().published_count(), 0);
    }

    #[tokio::test]
    async fn test_spawned_dispatch_counts_failures() {
        let ps = Arc::new(PubSub::new(MemoryBroker::new()));
        let stats = Arc::new(DispatchStats::default());
        let r = rule().with_action(Action::new("fax", "1"));

        spawn_dispatch(ps, Message::default(), r, vec![b"{}".to_vec()], stats.clone())
            .await
            .unwrap();
        assert_eq!(stats.snapshot().failed, 1);
    }
}
