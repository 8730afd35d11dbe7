//! Rules consumer: evaluates every message on the all-messages subjects.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use thingrelay_core::subjects::MESSAGES_SUBJECT;
use thingrelay_core::{Message, Result, Rule};
use thingrelay_messaging::{MessageHandler, Publisher, Subscriber};

use crate::dispatch::{spawn_dispatch, DispatchStats};
use crate::evaluator::evaluate;
use crate::repository::RuleRepository;

/// Subscriber id the consumer registers under.
pub const RULES_CONSUMER_ID: &str = "rules";

pub struct RulesConsumer {
    publisher: Arc<dyn Publisher>,
    repo: Option<RuleRepository>,
    stats: Arc<DispatchStats>,
}

impl RulesConsumer {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            repo: None,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Also evaluate stored rules assigned to the publishing thing.
    pub fn with_repository(mut self, repo: RuleRepository) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Subscribe to `messages` and `messages.>`.
    pub async fn start<S: Subscriber + ?Sized>(self: Arc<Self>, subscriber: &S) -> Result<()> {
        subscriber
            .subscribe(RULES_CONSUMER_ID, MESSAGES_SUBJECT, self.clone())
            .await?;
        subscriber
            .subscribe(
                RULES_CONSUMER_ID,
                &format!("{}.>", MESSAGES_SUBJECT),
                self,
            )
            .await
    }

    /// Envelope rules followed by assigned rules not already on the envelope.
    fn rules_for(&self, msg: &Message) -> Vec<Rule> {
        let mut rules = msg.rules().to_vec();
        if let Some(repo) = &self.repo {
            match repo.retrieve_by_thing(&msg.publisher) {
                Ok(assigned) => {
                    for rule in assigned {
                        if !rules.iter().any(|r| r.id == rule.id) {
                            rules.push(rule);
                        }
                    }
                }
                Err(e) => warn!(thing_id = %msg.publisher, error = %e, "Failed to load assigned rules"),
            }
        }
        rules
    }
}

#[async_trait]
impl MessageHandler for RulesConsumer {
    async fn handle(&self, msg: Message) -> Result<()> {
        let Some(format) = msg.format() else {
            debug!(publisher = %msg.publisher, "Skipping rules for unknown content type");
            return Ok(());
        };

        for rule in self.rules_for(&msg) {
            let evaluation = match evaluate(&msg.payload, format, &rule) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    self.stats.record_evaluation_error();
                    warn!(rule_id = %rule.id, publisher = %msg.publisher, error = %e, "Rule evaluation failed");
                    continue;
                }
            };
            if evaluation.skipped > 0 {
                self.stats.record_evaluation_error();
                warn!(
                    rule_id = %rule.id,
                    publisher = %msg.publisher,
                    skipped = evaluation.skipped,
                    "Records with object or array values skipped"
                );
            }
            if !evaluation.valid {
                debug!(rule_id = %rule.id, records = evaluation.triggered.len(), "Rule triggered");
                spawn_dispatch(
                    self.publisher.clone(),
                    msg.clone(),
                    rule,
                    evaluation.triggered,
                    self.stats.clone(),
                );
            }
        }
        Ok(())
    }
}
