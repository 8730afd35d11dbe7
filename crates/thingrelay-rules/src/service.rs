//! Rules management.
//!
//! Every call is checked against the Things service: group-scoped calls need
//! group access, thing-scoped calls need thing access, and backup/restore
//! need the root subject.

use serde::{Deserialize, Serialize};
use tracing::info;

use thingrelay_core::things::ROOT_SUBJECT;
use thingrelay_core::{Error, Result, Rule, SharedThings};

use crate::repository::{RuleAssignment, RuleRepository};
use crate::validation::validate_rule;

/// Full dump of rules and their assignments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesBackup {
    pub rules: Vec<Rule>,
    pub assignments: Vec<RuleAssignment>,
}

pub struct RulesService {
    things: SharedThings,
    repo: RuleRepository,
}

impl RulesService {
    pub fn new(things: SharedThings, repo: RuleRepository) -> Self {
        Self { things, repo }
    }

    pub fn repository(&self) -> &RuleRepository {
        &self.repo
    }

    /// Validate and store rules in a group, assigning fresh ids.
    pub async fn create_rules(&self, token: &str, group_id: &str, rules: Vec<Rule>) -> Result<Vec<Rule>> {
        self.things.can_user_access_group(token, group_id).await?;

        let mut created = Vec::with_capacity(rules.len());
        for mut rule in rules {
            validate_rule(&rule)?;
            rule.id = uuid::Uuid::new_v4().to_string();
            rule.group_id = group_id.to_string();
            created.push(rule);
        }

        self.repo.save(&created)?;
        info!(group_id, count = created.len(), "Rules created");
        Ok(created)
    }

    pub async fn list_rules_by_group(&self, token: &str, group_id: &str) -> Result<Vec<Rule>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.repo.retrieve_by_group(group_id)
    }

    pub async fn list_rules_by_thing(&self, token: &str, thing_id: &str) -> Result<Vec<Rule>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        self.repo.retrieve_by_thing(thing_id)
    }

    pub async fn view_rule(&self, token: &str, id: &str) -> Result<Rule> {
        let rule = self.repo.retrieve(id)?;
        self.things.can_user_access_group(token, &rule.group_id).await?;
        Ok(rule)
    }

    /// Replace a rule's definition. The id and group are kept.
    pub async fn update_rule(&self, token: &str, mut rule: Rule) -> Result<Rule> {
        let current = self.view_rule(token, &rule.id).await?;
        validate_rule(&rule)?;
        rule.group_id = current.group_id;
        self.repo.save(std::slice::from_ref(&rule))?;
        Ok(rule)
    }

    pub async fn remove_rules(&self, token: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            self.view_rule(token, id).await?;
        }
        self.repo.remove(ids)
    }

    /// Assign rules to a thing. Rules must belong to the thing's group.
    pub async fn assign_rules(&self, token: &str, thing_id: &str, rule_ids: &[String]) -> Result<()> {
        self.things.can_user_access_thing(token, thing_id).await?;
        let group_id = self.things.get_group_id_by_thing(thing_id).await?;

        for id in rule_ids {
            let rule = self.repo.retrieve(id)?;
            if rule.group_id != group_id {
                return Err(Error::Authorization(format!(
                    "rule {} is not in the group of thing {}",
                    id, thing_id
                )));
            }
        }
        self.repo.assign(thing_id, rule_ids)
    }

    pub async fn unassign_rules(&self, token: &str, thing_id: &str, rule_ids: &[String]) -> Result<()> {
        self.things.can_user_access_thing(token, thing_id).await?;
        self.repo.unassign(thing_id, rule_ids)
    }

    pub async fn backup(&self, token: &str) -> Result<RulesBackup> {
        self.things.authorize(token, ROOT_SUBJECT).await?;
        Ok(RulesBackup {
            rules: self.repo.retrieve_all()?,
            assignments: self.repo.assignments()?,
        })
    }

    pub async fn restore(&self, token: &str, backup: RulesBackup) -> Result<()> {
        self.things.authorize(token, ROOT_SUBJECT).await?;
        self.repo.save(&backup.rules)?;
        self.repo.save_assignments(&backup.assignments)?;
        info!(
            rules = backup.rules.len(),
            assignments = backup.assignments.len(),
            "Rules restored"
        );
        Ok(())
    }
}
