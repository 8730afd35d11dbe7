//! Rule and rule-assignment persistence.

use serde::{Deserialize, Serialize};

use thingrelay_core::{Result, Rule};
use thingrelay_storage::{Collection, SharedBackend};

const RULES_TABLE: &str = "rules";
const ASSIGNMENTS_TABLE: &str = "rule_things";

/// Join row between a rule and a thing it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAssignment {
    pub rule_id: String,
    pub thing_id: String,
}

impl RuleAssignment {
    pub fn new(rule_id: impl Into<String>, thing_id: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            thing_id: thing_id.into(),
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.thing_id, self.rule_id)
    }
}

#[derive(Clone)]
pub struct RuleRepository {
    rules: Collection<Rule>,
    assignments: Collection<RuleAssignment>,
}

impl RuleRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            rules: Collection::new(backend.clone(), RULES_TABLE),
            assignments: Collection::new(backend, ASSIGNMENTS_TABLE),
        }
    }

    pub fn save(&self, rules: &[Rule]) -> Result<()> {
        Ok(self
            .rules
            .put_batch(rules.iter().map(|r| (r.id.clone(), r)))?)
    }

    pub fn retrieve(&self, id: &str) -> Result<Rule> {
        Ok(self.rules.require(id)?)
    }

    pub fn retrieve_all(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.all()?)
    }

    pub fn retrieve_by_group(&self, group_id: &str) -> Result<Vec<Rule>> {
        Ok(self
            .retrieve_all()?
            .into_iter()
            .filter(|r| r.group_id == group_id)
            .collect())
    }

    /// Rules assigned to a thing. Dangling assignments are skipped.
    pub fn retrieve_by_thing(&self, thing_id: &str) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for assignment in self.assignments.values(&format!("{}:", thing_id))? {
            if let Some(rule) = self.rules.get(&assignment.rule_id)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Remove rules and every assignment that points at them.
    pub fn remove(&self, ids: &[String]) -> Result<()> {
        for (key, assignment) in self.assignments.scan("")? {
            if ids.contains(&assignment.rule_id) {
                self.assignments.remove(&key)?;
            }
        }
        for id in ids {
            self.rules.remove(id)?;
        }
        Ok(())
    }

    pub fn assign(&self, thing_id: &str, rule_ids: &[String]) -> Result<()> {
        let rows: Vec<RuleAssignment> = rule_ids
            .iter()
            .map(|id| RuleAssignment::new(id.clone(), thing_id))
            .collect();
        Ok(self
            .assignments
            .put_batch(rows.iter().map(|row| (row.key(), row)))?)
    }

    pub fn unassign(&self, thing_id: &str, rule_ids: &[String]) -> Result<()> {
        for id in rule_ids {
            self.assignments
                .remove(&RuleAssignment::new(id.clone(), thing_id).key())?;
        }
        Ok(())
    }

    pub fn assignments(&self) -> Result<Vec<RuleAssignment>> {
        Ok(self.assignments.all()?)
    }

    pub fn save_assignments(&self, rows: &[RuleAssignment]) -> Result<()> {
        Ok(self
            .assignments
            .put_batch(rows.iter().map(|row| (row.key(), row)))?)
    }
}
